//! Authentication gateway library
//!
//! Bearer token authentication for an HTTP API, accepting three kinds of
//! credentials on one port.
//!
//! # Features
//!
//! - **Admin tokens**: HMAC tokens the service issues to itself
//! - **OIDC**: provider discovery and key set resolution at startup, optionally
//!   through a forwarding proxy with a custom CA
//! - **Cluster fallback**: unrecognized tokens are checked by the cluster's
//!   own authentication
//! - **Axum middleware**: binds the verified [`auth::Identity`] to each request

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to install tracing: {e}"))),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to install tracing: {e}"))),
    }
}
