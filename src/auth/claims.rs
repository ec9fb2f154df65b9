//! Unverified issuer peek, used only to pick a verifier.
//!
//! Nothing read here is trusted: the payload signature is not checked and the
//! selected verifier re-validates everything. [`UnverifiedClaims`] exposes the
//! issuer and nothing else, so it cannot leak into an [`Identity`](super::Identity).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

use super::error::AuthError;

/// Registered claims read from an unverified token, for routing only.
#[derive(Debug)]
pub struct UnverifiedClaims {
    issuer: String,
}

#[derive(Deserialize)]
struct RoutingClaims {
    #[serde(default)]
    iss: Option<String>,
}

impl UnverifiedClaims {
    /// Decode the payload of `token` without checking its signature.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedCredential`] when the token is not three
    /// dot-separated segments, the header or payload is not base64url, or
    /// either is not a JSON object.
    pub fn peek(token: &str) -> Result<Self, AuthError> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(_signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::MalformedCredential);
        };

        // The header must at least be a JSON object for the token to be a JWT.
        decode_segment::<serde_json::Map<String, serde_json::Value>>(header)?;
        let claims: RoutingClaims = decode_segment(payload)?;

        Ok(Self {
            issuer: claims.iss.unwrap_or_default(),
        })
    }

    /// The `iss` claim, or an empty string when absent.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|_| AuthError::MalformedCredential)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::MalformedCredential)
}
