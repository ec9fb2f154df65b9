//! Error types for the authentication gateway

use std::io;

use thiserror::Error;

/// Result type alias for the authentication gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Process-level errors.
///
/// Per-request authentication failures use
/// [`AuthError`](crate::auth::AuthError) instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// OIDC issuer or key set could not be resolved
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JWT encoding or key error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// HTTP server failure
    #[error("Server error: {0}")]
    Server(String),
}

impl Error {
    /// Create a discovery error
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery(message.into())
    }
}
