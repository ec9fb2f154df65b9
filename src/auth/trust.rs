//! Custom trust anchors and the outbound HTTP client built on them.
//!
//! All bundles are expected in **PEM format**. When no bundle is configured
//! the client keeps the system trust store.

use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::Certificate;
use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;
use tracing::debug;

use crate::{Error, Result};

/// Load a PEM-encoded CA bundle.
///
/// Returns `Ok(None)` when `path` is `None`, meaning "use system defaults".
///
/// # Errors
///
/// Returns [`Error::Config`] if the file cannot be read, a PEM block cannot be
/// decoded, or the bundle holds no certificate.
pub fn load_trust_anchors(path: Option<&Path>) -> Result<Option<Vec<Certificate>>> {
    let Some(path) = path else {
        return Ok(None);
    };

    let pem = fs::read(path)
        .map_err(|e| Error::Config(format!("Failed to read CA bundle '{}': {e}", path.display())))?;

    let ders = CertificateDer::pem_slice_iter(&pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::Config(format!("Failed to parse CA bundle '{}': {e}", path.display()))
        })?;

    if ders.is_empty() {
        return Err(Error::Config(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }

    let certs = ders
        .iter()
        .map(|der| {
            Certificate::from_der(der.as_ref()).map_err(|e| {
                Error::Config(format!("Invalid certificate in '{}': {e}", path.display()))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(path = %path.display(), count = certs.len(), "Loaded CA bundle");
    Ok(Some(certs))
}

/// Build the outbound client, adding `anchors` on top of the system roots.
///
/// # Errors
///
/// Returns [`Error::Http`] if the TLS backend rejects the configuration.
pub fn http_client(anchors: Option<&[Certificate]>, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("authn-gateway/", env!("CARGO_PKG_VERSION")));

    for cert in anchors.unwrap_or_default() {
        builder = builder.add_root_certificate(cert.clone());
    }

    Ok(builder.build()?)
}
