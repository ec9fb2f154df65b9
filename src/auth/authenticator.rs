//! Authentication orchestrator.
//!
//! ```text
//! request
//!   -> exempt path?                       -> Exempt (no identity)
//!   -> Authorization: Bearer <token>?     -> NoCredential
//!   -> unverified issuer peek             -> MalformedCredential
//!   -> iss == admin issuer (if enabled)   -> admin verifier   (final)
//!   -> iss == OIDC issuer (if enabled)    -> OIDC verifier    (final)
//!   -> otherwise                          -> cluster verifier (final)
//! ```
//!
//! The first matching scheme decides; a token that fails its scheme is never
//! retried against another one.

use std::sync::Arc;

use axum::http::{HeaderMap, header::AUTHORIZATION};
use tracing::{debug, info};

use super::admin::{AdminVerifier, HmacAdminVerifier};
use super::claims::UnverifiedClaims;
use super::cluster::{ClusterVerifier, SelfReviewClusterVerifier};
use super::discovery::discover;
use super::error::AuthError;
use super::identity::Identity;
use super::oidc::{ClaimMappingResolver, JwksOidcVerifier, OidcVerifier};
use super::trust::{http_client, load_trust_anchors};
use crate::config::AuthConfig;
use crate::Result;

/// Outcome of a successful pass through the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum Authentication {
    /// The path is exempt; no identity is bound.
    Exempt,
    /// The caller was verified by exactly one scheme.
    Authenticated(Identity),
}

/// Ties exempt routes, token extraction, routing and the three verifiers
/// together. Immutable once built and shared by `Arc` across requests.
pub struct Authenticator {
    exempt_paths: Vec<String>,
    admin: Option<Arc<dyn AdminVerifier>>,
    oidc: Option<Arc<dyn OidcVerifier>>,
    cluster: Arc<dyn ClusterVerifier>,
}

impl Authenticator {
    /// Start building an authenticator around the mandatory cluster fallback.
    pub fn builder(cluster: Arc<dyn ClusterVerifier>) -> AuthenticatorBuilder {
        AuthenticatorBuilder {
            exempt_paths: Vec::new(),
            admin: None,
            oidc: None,
            cluster,
        }
    }

    /// Initialize every configured scheme.
    ///
    /// This is the only place OIDC discovery runs; it must complete before
    /// the service accepts requests.
    ///
    /// # Errors
    ///
    /// Returns an error if a CA bundle cannot be loaded, the admin signing
    /// key cannot be resolved, or OIDC discovery fails.
    pub async fn from_config(config: &AuthConfig) -> Result<Self> {
        let cluster: Arc<dyn ClusterVerifier> =
            Arc::new(SelfReviewClusterVerifier::from_config(&config.cluster)?);
        let mut builder = Self::builder(cluster).exempt_paths(config.exempt_paths.clone());

        if let Some(admin) = &config.admin {
            builder = builder.admin(Arc::new(HmacAdminVerifier::from_config(admin)?));
            info!(issuer = %admin.token_issuer, "Admin token authentication enabled");
        }

        if let Some(oidc) = &config.oidc {
            let proxy = config.proxy.as_ref();
            let anchors = load_trust_anchors(proxy.and_then(|p| p.ca_cert_path.as_deref()))?;
            let http = http_client(anchors.as_deref(), config.discovery_timeout)?;
            let discovery = discover(oidc, proxy, &http).await?;

            let mut verifier = JwksOidcVerifier::new(oidc.clone(), discovery.key_set);
            if !oidc.service_accounts.is_empty() {
                verifier = verifier.with_service_accounts(Arc::new(ClaimMappingResolver::new(
                    oidc.service_accounts.clone(),
                )));
            }
            builder = builder.oidc(Arc::new(verifier));
            info!(issuer = %oidc.issuer_url, "OIDC authentication enabled");
        }

        Ok(builder.build())
    }

    /// Whether `path` bypasses authentication.
    #[must_use]
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| path_matches(p, path))
    }

    /// Whether self-issued admin tokens are accepted.
    #[must_use]
    pub fn admin_enabled(&self) -> bool {
        self.admin.is_some()
    }

    /// Authenticate a request by its path and headers.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] describing why the request was rejected.
    pub async fn authenticate(
        &self,
        path: &str,
        headers: &HeaderMap,
    ) -> std::result::Result<Authentication, AuthError> {
        if self.is_exempt(path) {
            debug!(path = %path, "Exempt path, skipping auth");
            return Ok(Authentication::Exempt);
        }

        let token = bearer_token(headers).ok_or(AuthError::NoCredential)?;
        self.verify_token(token).await.map(Authentication::Authenticated)
    }

    /// Route `token` by its unverified issuer and verify it with exactly one
    /// scheme.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedCredential`] for tokens that are not
    /// JWTs, otherwise the chosen verifier's error.
    pub async fn verify_token(&self, token: &str) -> std::result::Result<Identity, AuthError> {
        let routing = UnverifiedClaims::peek(token)?;
        let issuer = routing.issuer();

        if let Some(admin) = self.admin.as_ref().filter(|a| a.issuer() == issuer) {
            debug!(issuer = %issuer, "Routing to admin verifier");
            return admin.verify(token).await;
        }

        if self.oidc.as_ref().is_some_and(|o| o.issuer() == issuer) {
            debug!(issuer = %issuer, "Routing to OIDC verifier");
            return self.verify_oidc(token).await;
        }

        debug!(issuer = %issuer, "Unrecognized issuer, routing to cluster verifier");
        self.cluster.verify(token).await
    }

    /// Verify `token` as an OIDC token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SchemeUnsupported`] when OIDC is not configured,
    /// otherwise the OIDC verifier's error.
    pub async fn verify_oidc(&self, token: &str) -> std::result::Result<Identity, AuthError> {
        match &self.oidc {
            Some(oidc) => oidc.verify(token).await,
            None => Err(AuthError::SchemeUnsupported("OpenID Connect")),
        }
    }
}

/// Builder for [`Authenticator`]; lets tests substitute any verifier.
pub struct AuthenticatorBuilder {
    exempt_paths: Vec<String>,
    admin: Option<Arc<dyn AdminVerifier>>,
    oidc: Option<Arc<dyn OidcVerifier>>,
    cluster: Arc<dyn ClusterVerifier>,
}

impl AuthenticatorBuilder {
    /// Paths that bypass authentication.
    #[must_use]
    pub fn exempt_paths(mut self, paths: Vec<String>) -> Self {
        self.exempt_paths = paths;
        self
    }

    /// Enable admin tokens.
    #[must_use]
    pub fn admin(mut self, verifier: Arc<dyn AdminVerifier>) -> Self {
        self.admin = Some(verifier);
        self
    }

    /// Enable OIDC tokens.
    #[must_use]
    pub fn oidc(mut self, verifier: Arc<dyn OidcVerifier>) -> Self {
        self.oidc = Some(verifier);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Authenticator {
        Authenticator {
            exempt_paths: self.exempt_paths,
            admin: self.admin,
            oidc: self.oidc,
            cluster: self.cluster,
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is case-insensitive; an empty token counts as absent.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(char::is_whitespace)?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Exact match, or prefix match on a `/` boundary. Entries ending in `/`
/// match as plain prefixes.
fn path_matches(exempt: &str, path: &str) -> bool {
    if exempt.ends_with('/') {
        return path.starts_with(exempt);
    }
    match path.strip_prefix(exempt) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
