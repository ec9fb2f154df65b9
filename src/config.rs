//! Configuration management

use std::{
    collections::BTreeMap,
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Path every deployment leaves open so clients can discover how to log in.
pub const PUBLIC_SERVER_CONFIG_PATH: &str = "/v1beta1/system/public-server-config";

/// Liveness check path.
pub const HEALTH_PATH: &str = "/healthz";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving `env:` secrets.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or describes an inconsistent authentication setup.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // AUTHN_GATEWAY_AUTH__ADMIN__TOKEN_ISSUER=kargo
        figment = figment.merge(Env::prefixed("AUTHN_GATEWAY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.auth.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 30081,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Paths that bypass authentication entirely.
    ///
    /// An entry matches the exact path and anything below it on a `/`
    /// boundary; an entry ending in `/` matches as a plain prefix.
    pub exempt_paths: Vec<String>,

    /// Self-issued admin tokens (disabled when absent)
    pub admin: Option<AdminConfig>,

    /// External OpenID Connect provider (disabled when absent)
    pub oidc: Option<OidcConfig>,

    /// Forwarding proxy used to reach the OIDC provider's discovery endpoint
    pub proxy: Option<ProxyConfig>,

    /// Cluster API used for the fallback token check
    pub cluster: ClusterConfig,

    /// Timeout for the startup discovery and key set fetch
    #[serde(with = "humantime_serde")]
    pub discovery_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            exempt_paths: vec![
                PUBLIC_SERVER_CONFIG_PATH.to_string(),
                HEALTH_PATH.to_string(),
            ],
            admin: None,
            oidc: None,
            proxy: None,
            cluster: ClusterConfig::default(),
            discovery_timeout: Duration::from_secs(10),
        }
    }
}

impl AuthConfig {
    /// Reject configurations that would make issuer routing ambiguous.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when an issuer is empty or the admin and
    /// OIDC issuers collide.
    pub fn validate(&self) -> Result<()> {
        if let Some(admin) = &self.admin {
            if admin.token_issuer.is_empty() {
                return Err(Error::Config("auth.admin.token_issuer must not be empty".into()));
            }
        }
        if let Some(oidc) = &self.oidc {
            if oidc.issuer_url.is_empty() {
                return Err(Error::Config("auth.oidc.issuer_url must not be empty".into()));
            }
            if let Some(admin) = &self.admin {
                if admin.token_issuer == oidc.issuer_url {
                    return Err(Error::Config(format!(
                        "admin and OIDC issuers are both '{}'",
                        oidc.issuer_url
                    )));
                }
            }
        }
        if self.proxy.is_some() && self.oidc.is_none() {
            tracing::warn!("auth.proxy is set but OIDC is disabled; ignoring proxy");
        }
        Ok(())
    }
}

/// Self-issued admin token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Value of `iss` in admin tokens
    pub token_issuer: String,

    /// HMAC signing key. Supports a literal value or `env:VAR_NAME`.
    pub token_signing_key: String,

    /// Lifetime of tokens minted by `issue-admin-token`
    #[serde(default = "default_admin_token_ttl", with = "humantime_serde")]
    pub token_ttl: Duration,
}

fn default_admin_token_ttl() -> Duration {
    Duration::from_secs(24 * 3600)
}

impl AdminConfig {
    /// Resolve the signing key bytes (expanding `env:VAR_NAME`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the referenced variable is unset or the
    /// key is empty.
    pub fn resolve_signing_key(&self) -> Result<Vec<u8>> {
        let key = if let Some(var_name) = self.token_signing_key.strip_prefix("env:") {
            env::var(var_name).map_err(|_| {
                Error::Config(format!("admin signing key variable {var_name} is not set"))
            })?
        } else {
            self.token_signing_key.clone()
        };

        if key.is_empty() {
            return Err(Error::Config("admin signing key is empty".into()));
        }
        Ok(key.into_bytes())
    }
}

/// External OpenID Connect provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer URL; also the expected `iss` of every OIDC token
    pub issuer_url: String,

    /// Client ID advertised to UIs and CLIs through the public config
    #[serde(default)]
    pub client_id: Option<String>,

    /// Scopes advertised to UIs and CLIs through the public config
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Claim used as the display username (falls back to `sub`)
    #[serde(default)]
    pub username_claim: Option<String>,

    /// Claim holding group memberships
    #[serde(default)]
    pub groups_claim: Option<String>,

    /// Accepted `aud` values; audience is not checked when empty
    #[serde(default)]
    pub audiences: Vec<String>,

    /// Clock skew tolerated on `exp` and `nbf`
    #[serde(default = "default_leeway", with = "humantime_serde")]
    pub leeway: Duration,

    /// Claim-based service account bindings
    #[serde(default)]
    pub service_accounts: Vec<ServiceAccountMapping>,
}

fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "profile".to_string(),
        "email".to_string(),
        "groups".to_string(),
    ]
}

fn default_leeway() -> Duration {
    Duration::from_secs(60)
}

impl OidcConfig {
    /// Minimal config for `issuer_url`, everything else defaulted.
    pub fn new(issuer_url: impl Into<String>) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            client_id: None,
            scopes: default_scopes(),
            username_claim: None,
            groups_claim: None,
            audiences: Vec::new(),
            leeway: default_leeway(),
            service_accounts: Vec::new(),
        }
    }

    /// Claim holding group memberships (default `groups`).
    #[must_use]
    pub fn groups_claim(&self) -> &str {
        self.groups_claim.as_deref().unwrap_or("groups")
    }
}

/// Binds callers whose claims match to a cluster service account.
///
/// Matches when, for any listed claim, one of the caller's values for that
/// claim appears in the list.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceAccountMapping {
    /// Namespace of the service account
    pub namespace: String,
    /// Name of the service account
    pub name: String,
    /// Claim name to accepted values
    #[serde(default)]
    pub claims: BTreeMap<String, Vec<String>>,
}

/// Forwarding proxy in front of the identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Base address of the proxy, e.g. `https://dex.internal:5556`
    pub server_address: String,

    /// PEM bundle trusted when talking to the proxy
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,

    /// Path segment the provider is served under on the proxy
    #[serde(default = "default_proxy_prefix")]
    pub path_prefix: String,
}

fn default_proxy_prefix() -> String {
    "dex".to_string()
}

/// Cluster API reached by the fallback verifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Base URL of the cluster API server
    pub host: String,

    /// PEM bundle used to verify the API server
    pub ca_cert_path: Option<PathBuf>,

    /// Self-check endpoint the caller's token is presented to
    pub review_path: String,

    /// Timeout of the self-check call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: "https://kubernetes.default.svc".to_string(),
            ca_cert_path: None,
            review_path: "/apis/authentication.k8s.io/v1/selfsubjectreviews".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "1h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "30s", "5m", "1h", "100ms"; a bare number is seconds.
    ///
    /// # Errors
    ///
    /// Returns a message for malformed input or a value that does not fit
    /// in a [`Duration`] of whole seconds.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (digits, unit_secs) = if let Some(ms) = s.strip_suffix("ms") {
            let ms = ms.parse::<u64>().map_err(|e| format!("invalid duration '{s}': {e}"))?;
            return Ok(Duration::from_millis(ms));
        } else if let Some(secs) = s.strip_suffix('s') {
            (secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600)
        } else {
            (s, 1)
        };

        digits
            .parse::<u64>()
            .map_err(|e| format!("invalid duration '{s}': {e}"))?
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large"))
    }
}
