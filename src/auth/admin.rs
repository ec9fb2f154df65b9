//! Self-issued admin tokens.
//!
//! Admin tokens are HMAC-signed with the service's own key. Verification
//! checks signature, issuer and expiry with zero clock leeway. Every failure
//! is reported with the same reason; the real cause is only logged at debug.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::error::AuthError;
use super::identity::Identity;
use crate::config::AdminConfig;
use crate::Result;

const ADMIN_SUBJECT: &str = "admin";

/// Verifies the service's self-issued admin credential.
#[async_trait]
pub trait AdminVerifier: Send + Sync {
    /// The issuer admin tokens carry; used for routing.
    fn issuer(&self) -> &str;

    /// Verify `token` and build the admin identity.
    async fn verify(&self, token: &str) -> std::result::Result<Identity, AuthError>;
}

/// Claims carried by an admin token.
#[derive(Debug, Serialize, Deserialize)]
struct AdminClaims {
    iss: String,
    sub: String,
    iat: i64,
    nbf: i64,
    exp: i64,
    jti: String,
}

/// [`AdminVerifier`] using a shared HMAC key.
pub struct HmacAdminVerifier {
    issuer: String,
    key: DecodingKey,
}

impl HmacAdminVerifier {
    /// Create a verifier for tokens from `issuer` signed with `signing_key`.
    #[must_use]
    pub fn new(issuer: impl Into<String>, signing_key: &[u8]) -> Self {
        Self {
            issuer: issuer.into(),
            key: DecodingKey::from_secret(signing_key),
        }
    }

    /// Create a verifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the signing key cannot be resolved.
    pub fn from_config(config: &AdminConfig) -> Result<Self> {
        Ok(Self::new(&config.token_issuer, &config.resolve_signing_key()?))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation
    }
}

#[async_trait]
impl AdminVerifier for HmacAdminVerifier {
    fn issuer(&self) -> &str {
        &self.issuer
    }

    async fn verify(&self, token: &str) -> std::result::Result<Identity, AuthError> {
        match jsonwebtoken::decode::<serde_json::Value>(token, &self.key, &self.validation()) {
            Ok(_) => Ok(Identity::admin(token)),
            Err(e) => {
                debug!(error = %e, "Admin token rejected");
                Err(AuthError::verification("admin token rejected"))
            }
        }
    }
}

/// Mints admin tokens with the service's signing key.
pub struct AdminTokenSigner {
    issuer: String,
    key: EncodingKey,
}

impl AdminTokenSigner {
    /// Create a signer for `issuer` using `signing_key`.
    #[must_use]
    pub fn new(issuer: impl Into<String>, signing_key: &[u8]) -> Self {
        Self {
            issuer: issuer.into(),
            key: EncodingKey::from_secret(signing_key),
        }
    }

    /// Create a signer from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the signing key cannot be resolved.
    pub fn from_config(config: &AdminConfig) -> Result<Self> {
        Ok(Self::new(&config.token_issuer, &config.resolve_signing_key()?))
    }

    /// Issue an HS256 admin token valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Jwt`] if encoding fails.
    pub fn issue(&self, ttl: Duration) -> Result<String> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = AdminClaims {
            iss: self.issuer.clone(),
            sub: ADMIN_SUBJECT.to_string(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(ttl),
            jti: Uuid::new_v4().to_string(),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.key,
        )?)
    }
}
