//! Per-request authentication failures.
//!
//! Every variant collapses to one of two caller-visible messages at the
//! middleware boundary; the variant itself is only ever logged.

use thiserror::Error;

/// Message returned to callers that sent no credential.
pub const NO_TOKEN_MESSAGE: &str = "no token provided";

/// Message returned to callers for every other rejection.
pub const INVALID_TOKEN_MESSAGE: &str = "invalid token";

/// Why a request failed authentication.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No bearer token on a non-exempt route.
    #[error("no token provided")]
    NoCredential,

    /// The token is not a structurally valid JWT.
    #[error("malformed token")]
    MalformedCredential,

    /// The routed issuer belongs to a scheme that is not enabled.
    #[error("{0} is not supported")]
    SchemeUnsupported(&'static str),

    /// Signature, expiry, audience or remote check rejection.
    #[error("token verification failed: {0}")]
    VerificationFailed(String),
}

impl AuthError {
    /// Shorthand for [`AuthError::VerificationFailed`].
    pub fn verification(reason: impl Into<String>) -> Self {
        Self::VerificationFailed(reason.into())
    }

    /// The opaque message safe to show to the caller.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::NoCredential => NO_TOKEN_MESSAGE,
            Self::MalformedCredential | Self::SchemeUnsupported(_) | Self::VerificationFailed(_) => {
                INVALID_TOKEN_MESSAGE
            }
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::VerificationFailed(err.to_string())
    }
}
