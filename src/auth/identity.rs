//! The normalized identity bound into a request after authentication.

use std::collections::{BTreeMap, BTreeSet};

use axum::http::Extensions;
use serde::Serialize;
use serde_json::{Map, Value};

/// Which verifier produced an [`Identity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Self-issued admin token.
    Admin,
    /// Externally issued OIDC token.
    Oidc,
    /// Token accepted by the cluster's own authentication.
    Cluster,
}

/// A cluster service account, addressed by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ServiceAccountRef {
    /// Namespace of the service account.
    pub namespace: String,
    /// Name of the service account.
    pub name: String,
}

impl ServiceAccountRef {
    /// Build a reference from namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Service accounts grouped by a logical key (the namespace they live in).
pub type ServiceAccounts = BTreeMap<String, BTreeSet<ServiceAccountRef>>;

/// Authenticated caller.
///
/// Built by exactly one verifier, never modified after it is bound into the
/// request, and dropped with the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    /// Display name; empty for admin and cluster identities.
    pub username: String,
    /// True only for admin tokens.
    pub is_admin: bool,
    /// Verified claims; empty for admin and cluster identities.
    pub claims: Map<String, Value>,
    /// The raw token, for re-presenting to the cluster on the caller's behalf.
    #[serde(skip)]
    pub bearer_token: String,
    /// Service accounts the caller's claims resolve to (OIDC only).
    pub service_accounts: ServiceAccounts,
    /// The verifier that produced this identity.
    pub scheme: Scheme,
}

impl Identity {
    /// Identity for a verified admin token.
    pub fn admin(bearer_token: impl Into<String>) -> Self {
        Self {
            username: String::new(),
            is_admin: true,
            claims: Map::new(),
            bearer_token: bearer_token.into(),
            service_accounts: ServiceAccounts::new(),
            scheme: Scheme::Admin,
        }
    }

    /// Identity for a token the cluster accepted.
    pub fn cluster(bearer_token: impl Into<String>) -> Self {
        Self {
            username: String::new(),
            is_admin: false,
            claims: Map::new(),
            bearer_token: bearer_token.into(),
            service_accounts: ServiceAccounts::new(),
            scheme: Scheme::Cluster,
        }
    }

    /// Identity for a verified OIDC token.
    pub fn oidc(
        username: impl Into<String>,
        claims: Map<String, Value>,
        bearer_token: impl Into<String>,
        service_accounts: ServiceAccounts,
    ) -> Self {
        Self {
            username: username.into(),
            is_admin: false,
            claims,
            bearer_token: bearer_token.into(),
            service_accounts,
            scheme: Scheme::Oidc,
        }
    }

    /// String entries of a list-valued claim such as `groups`.
    ///
    /// A single string value is treated as a one-element list.
    #[must_use]
    pub fn groups(&self, claim: &str) -> Vec<&str> {
        match self.claims.get(claim) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(s)) => vec![s.as_str()],
            _ => Vec::new(),
        }
    }
}

/// Look up the identity bound to the current request, if any.
///
/// Returns `None` for exempt routes and for requests that have not been (or
/// failed to be) authenticated.
#[must_use]
pub fn current(extensions: &Extensions) -> Option<&Identity> {
    extensions.get::<Identity>()
}
