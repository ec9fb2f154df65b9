//! OIDC token verification against the resolved key set.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Pick the key for `kid` from the startup [`KeySet`]; the header algorithm
//!    must belong to that key's family, so a public key can never be used as
//!    an HMAC secret.
//! 3. Verify the signature and standard claims (`exp`, `nbf`, `iss`, and `aud`
//!    when audiences are configured).
//! 4. Map the configured username claim, keep every claim verbatim, and
//!    optionally resolve service account bindings.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{TokenData, Validation};
use serde_json::{Map, Value};
use tracing::debug;

use super::discovery::KeySet;
use super::error::AuthError;
use super::identity::{Identity, ServiceAccountRef, ServiceAccounts};
use crate::config::{OidcConfig, ServiceAccountMapping};

/// Verifies tokens issued by the external identity provider.
#[async_trait]
pub trait OidcVerifier: Send + Sync {
    /// The issuer this verifier accepts; used for routing.
    fn issuer(&self) -> &str;

    /// Verify `token` and build the caller's identity.
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Maps verified claims to cluster service accounts.
///
/// Returning an empty map is not an error.
#[async_trait]
pub trait ServiceAccountResolver: Send + Sync {
    /// Service accounts the claims resolve to, grouped by namespace.
    async fn resolve(&self, claims: &Map<String, Value>) -> Result<ServiceAccounts, AuthError>;
}

/// [`OidcVerifier`] backed by the key set resolved at startup.
pub struct JwksOidcVerifier {
    config: OidcConfig,
    key_set: Arc<KeySet>,
    service_accounts: Option<Arc<dyn ServiceAccountResolver>>,
}

impl JwksOidcVerifier {
    /// Create a verifier for `config` using `key_set`.
    #[must_use]
    pub fn new(config: OidcConfig, key_set: Arc<KeySet>) -> Self {
        Self {
            config,
            key_set,
            service_accounts: None,
        }
    }

    /// Enrich identities with service accounts from `resolver`.
    #[must_use]
    pub fn with_service_accounts(mut self, resolver: Arc<dyn ServiceAccountResolver>) -> Self {
        self.service_accounts = Some(resolver);
        self
    }

    fn validation(&self, alg: jsonwebtoken::Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = self.config.leeway.as_secs();
        validation.validate_nbf = true;
        validation.set_issuer(&[self.config.issuer_url.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        if self.config.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(self.config.audiences.as_slice());
        }
        validation
    }
}

#[async_trait]
impl OidcVerifier for JwksOidcVerifier {
    fn issuer(&self) -> &str {
        &self.config.issuer_url
    }

    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let header = jsonwebtoken::decode_header(token)?;

        let key = self
            .key_set
            .find(header.kid.as_deref())
            .ok_or_else(|| AuthError::verification(format!("no signing key for kid {:?}", header.kid)))?;

        if !key.algorithms().contains(&header.alg) {
            return Err(AuthError::verification(format!(
                "algorithm {:?} not allowed for key {:?}",
                header.alg,
                key.kid()
            )));
        }

        let data: TokenData<Map<String, Value>> =
            jsonwebtoken::decode(token, key.decoding_key(), &self.validation(header.alg))?;
        let claims = data.claims;

        let username = username_from(&claims, self.config.username_claim.as_deref());

        let service_accounts = match &self.service_accounts {
            Some(resolver) => resolver.resolve(&claims).await?,
            None => ServiceAccounts::new(),
        };

        debug!(
            username = %username,
            service_accounts = service_accounts.values().map(BTreeSet::len).sum::<usize>(),
            "OIDC token verified"
        );

        Ok(Identity::oidc(username, claims, token, service_accounts))
    }
}

/// The configured claim as a string, falling back to `sub`.
fn username_from(claims: &Map<String, Value>, username_claim: Option<&str>) -> String {
    username_claim
        .and_then(|name| claims.get(name))
        .and_then(Value::as_str)
        .or_else(|| claims.get("sub").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

/// [`ServiceAccountResolver`] driven by static claim mappings from config.
#[derive(Debug, Clone, Default)]
pub struct ClaimMappingResolver {
    mappings: Vec<ServiceAccountMapping>,
}

impl ClaimMappingResolver {
    /// Create a resolver over `mappings`.
    #[must_use]
    pub fn new(mappings: Vec<ServiceAccountMapping>) -> Self {
        Self { mappings }
    }

    fn matches(mapping: &ServiceAccountMapping, claims: &Map<String, Value>) -> bool {
        mapping.claims.iter().any(|(claim, accepted)| match claims.get(claim) {
            Some(Value::String(value)) => accepted.iter().any(|a| a == value),
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .any(|value| accepted.iter().any(|a| a == value)),
            _ => false,
        })
    }
}

#[async_trait]
impl ServiceAccountResolver for ClaimMappingResolver {
    async fn resolve(&self, claims: &Map<String, Value>) -> Result<ServiceAccounts, AuthError> {
        let mut accounts = ServiceAccounts::new();
        for mapping in self.mappings.iter().filter(|m| Self::matches(m, claims)) {
            accounts
                .entry(mapping.namespace.clone())
                .or_default()
                .insert(ServiceAccountRef::new(&mapping.namespace, &mapping.name));
        }
        Ok(accounts)
    }
}
