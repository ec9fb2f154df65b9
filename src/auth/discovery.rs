//! OIDC issuer discovery and key set resolution.
//!
//! # Flow
//!
//! 1. Fetch the discovery document, either from
//!    `{issuer_url}/.well-known/openid-configuration` or, when a forwarding
//!    proxy is configured, from
//!    `{proxy}/{path_prefix}/.well-known/openid-configuration`.
//! 2. Without a proxy the document's `issuer` must equal the configured
//!    issuer exactly, trailing slash included. With a proxy the document's
//!    `issuer` is ignored: the configured `issuer_url` stays the expected
//!    `iss` of every token.
//! 3. Fetch `jwks_uri` (rewritten onto the proxy when it lives under the
//!    public issuer URL) and turn every usable asymmetric key into a
//!    [`VerificationKey`], narrowed to the algorithms the document lists in
//!    `id_token_signing_alg_values_supported`.
//!
//! Runs once at startup. The resulting [`KeySet`] is immutable and shared by
//! `Arc` across all requests. Any failure is an [`Error::Discovery`]; there
//! are no retries.

use std::sync::Arc;

use jsonwebtoken::{
    Algorithm, DecodingKey,
    jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet, PublicKeyUse},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::{OidcConfig, ProxyConfig};
use crate::{Error, Result};

const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

/// The subset of the provider's discovery document we rely on.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer as reported by the document.
    pub issuer: String,
    /// Location of the provider's signing keys.
    pub jwks_uri: String,
    /// Algorithms the provider signs ID tokens with.
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

/// One public key usable for signature verification.
#[derive(Clone)]
pub struct VerificationKey {
    kid: Option<String>,
    algorithms: Vec<Algorithm>,
    key: DecodingKey,
}

impl VerificationKey {
    /// Key ID, if the provider published one.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Algorithms this key may verify.
    #[must_use]
    pub fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }

    /// The decoding key.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

/// The provider's public signing keys, resolved once.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<VerificationKey>,
}

impl KeySet {
    /// Convert a JWKS into verification keys.
    ///
    /// Symmetric keys, encryption keys and curves without a matching
    /// algorithm are skipped.
    #[must_use]
    pub fn from_jwks(jwks: &JwkSet) -> Self {
        let keys = jwks.keys.iter().filter_map(verification_key).collect();
        Self { keys }
    }

    /// Find the key for `kid`. A token without `kid` matches only when the
    /// set holds exactly one key.
    #[must_use]
    pub fn find(&self, kid: Option<&str>) -> Option<&VerificationKey> {
        match kid {
            Some(kid) => self.keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
            None if self.keys.len() == 1 => self.keys.first(),
            None => None,
        }
    }

    /// Narrow every key to the algorithms the provider advertises for ID
    /// tokens. An empty list leaves the set unchanged; keys left with no
    /// algorithm are dropped.
    #[must_use]
    pub fn restricted_to(self, advertised: &[String]) -> Self {
        if advertised.is_empty() {
            return self;
        }
        let allowed: Vec<Algorithm> = advertised.iter().filter_map(|a| a.parse().ok()).collect();
        let keys = self
            .keys
            .into_iter()
            .filter_map(|mut key| {
                key.algorithms.retain(|alg| allowed.contains(alg));
                (!key.algorithms.is_empty()).then_some(key)
            })
            .collect();
        Self { keys }
    }

    /// Number of usable keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no usable key was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn verification_key(jwk: &Jwk) -> Option<VerificationKey> {
    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        return None;
    }

    let algorithms = match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => vec![
            Algorithm::RS256,
            Algorithm::RS384,
            Algorithm::RS512,
            Algorithm::PS256,
            Algorithm::PS384,
            Algorithm::PS512,
        ],
        AlgorithmParameters::EllipticCurve(ec) => match ec.curve {
            EllipticCurve::P256 => vec![Algorithm::ES256],
            EllipticCurve::P384 => vec![Algorithm::ES384],
            _ => return None,
        },
        AlgorithmParameters::OctetKeyPair(okp) => match okp.curve {
            EllipticCurve::Ed25519 => vec![Algorithm::EdDSA],
            _ => return None,
        },
        // A shared secret in a public key set would let anyone mint tokens.
        AlgorithmParameters::OctetKey(_) => return None,
    };

    match DecodingKey::from_jwk(jwk) {
        Ok(key) => Some(VerificationKey {
            kid: jwk.common.key_id.clone(),
            algorithms,
            key,
        }),
        Err(e) => {
            warn!(kid = ?jwk.common.key_id, error = %e, "Skipping unusable JWK");
            None
        }
    }
}

/// Result of startup discovery.
#[derive(Debug, Clone)]
pub struct Discovery {
    /// The discovery document as fetched.
    pub metadata: ProviderMetadata,
    /// The resolved signing keys.
    pub key_set: Arc<KeySet>,
}

/// Base URL of the provider as seen through the proxy.
fn proxy_base(proxy: &ProxyConfig) -> String {
    let address = proxy.server_address.trim_end_matches('/');
    let prefix = proxy.path_prefix.trim_matches('/');
    if prefix.is_empty() {
        address.to_string()
    } else {
        format!("{address}/{prefix}")
    }
}

/// Where the discovery document is fetched from.
#[must_use]
pub fn discovery_url(oidc: &OidcConfig, proxy: Option<&ProxyConfig>) -> String {
    let base = match proxy {
        Some(proxy) => proxy_base(proxy),
        None => oidc.issuer_url.trim_end_matches('/').to_string(),
    };
    format!("{base}/{WELL_KNOWN_PATH}")
}

/// Rewrite a provider URL under the public issuer onto the proxy.
///
/// URLs outside the issuer are returned unchanged.
#[must_use]
pub fn rewrite_through_proxy(url: &str, issuer_url: &str, proxy: &ProxyConfig) -> String {
    let issuer = issuer_url.trim_end_matches('/');
    match url.strip_prefix(issuer) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            format!("{}{rest}", proxy_base(proxy))
        }
        _ => url.to_string(),
    }
}

/// Fetch the discovery document and key set for `oidc`.
///
/// # Errors
///
/// Returns [`Error::Discovery`] on any network, status, or parse failure, on
/// an issuer mismatch (direct mode only), or when the key set holds no
/// usable key.
pub async fn discover(
    oidc: &OidcConfig,
    proxy: Option<&ProxyConfig>,
    http: &reqwest::Client,
) -> Result<Discovery> {
    let url = discovery_url(oidc, proxy);
    debug!(url = %url, proxied = proxy.is_some(), "Fetching OIDC discovery document");
    let metadata: ProviderMetadata = fetch_json(http, &url, "discovery document").await?;

    let jwks_uri = match proxy {
        Some(proxy) => rewrite_through_proxy(&metadata.jwks_uri, &oidc.issuer_url, proxy),
        None => {
            // Exact match: routing and token validation compare `iss` byte for byte.
            if metadata.issuer != oidc.issuer_url {
                return Err(Error::discovery(format!(
                    "issuer mismatch: expected {}, document reports {}",
                    oidc.issuer_url, metadata.issuer
                )));
            }
            metadata.jwks_uri.clone()
        }
    };

    debug!(jwks_uri = %jwks_uri, "Fetching OIDC key set");
    let jwks: JwkSet = fetch_json(http, &jwks_uri, "key set").await?;
    let key_set =
        KeySet::from_jwks(&jwks).restricted_to(&metadata.id_token_signing_alg_values_supported);
    if key_set.is_empty() {
        return Err(Error::discovery(format!(
            "key set at {jwks_uri} contains no usable signing keys"
        )));
    }

    info!(
        issuer = %oidc.issuer_url,
        keys = key_set.len(),
        proxied = proxy.is_some(),
        "Resolved OIDC key set"
    );

    Ok(Discovery {
        metadata,
        key_set: Arc::new(key_set),
    })
}

async fn fetch_json<T: DeserializeOwned>(http: &reqwest::Client, url: &str, what: &str) -> Result<T> {
    let response = http
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| Error::discovery(format!("failed to fetch {what} from {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::discovery(format!(
            "failed to fetch {what} from {url}: HTTP {status}"
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| Error::discovery(format!("invalid {what} from {url}: {e}")))
}
