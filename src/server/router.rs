//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::auth::{Authenticator, Identity, authenticate};
use crate::config::{Config, HEALTH_PATH, PUBLIC_SERVER_CONFIG_PATH};

/// Path of the protected identity echo endpoint.
pub const WHOAMI_PATH: &str = "/v1beta1/whoami";

/// Login hints published to unauthenticated clients.
#[derive(Debug, Clone, Serialize)]
pub struct PublicServerConfig {
    /// Whether self-issued admin tokens are accepted
    pub admin_account_enabled: bool,
    /// OIDC login parameters, when OIDC is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oidc_config: Option<PublicOidcConfig>,
}

/// OIDC parameters a client needs to start a login.
#[derive(Debug, Clone, Serialize)]
pub struct PublicOidcConfig {
    /// Issuer URL
    pub issuer_url: String,
    /// Client ID registered with the provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Scopes to request
    pub scopes: Vec<String>,
}

impl PublicServerConfig {
    /// Derive the public view from the full configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            admin_account_enabled: config.auth.admin.is_some(),
            oidc_config: config.auth.oidc.as_ref().map(|oidc| PublicOidcConfig {
                issuer_url: oidc.issuer_url.clone(),
                client_id: oidc.client_id.clone(),
                scopes: oidc.scopes.clone(),
            }),
        }
    }
}

/// Shared application state
pub struct AppState {
    /// Request authenticator
    pub authenticator: Arc<Authenticator>,
    /// Published login hints
    pub public_config: PublicServerConfig,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let authenticator = Arc::clone(&state.authenticator);

    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .route(PUBLIC_SERVER_CONFIG_PATH, get(public_server_config_handler))
        .route(WHOAMI_PATH, get(whoami_handler))
        .layer(middleware::from_fn_with_state(authenticator, authenticate))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn public_server_config_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.public_config.clone())
}

async fn whoami_handler(Extension(identity): Extension<Identity>) -> impl IntoResponse {
    Json(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminConfig, OidcConfig};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn public_config_without_oidc_omits_it() {
        let config = Config::default();
        assert_eq!(
            serde_json::to_value(PublicServerConfig::from_config(&config)).unwrap(),
            json!({"admin_account_enabled": false})
        );
    }

    #[test]
    fn public_config_lists_login_parameters() {
        let mut config = Config::default();
        config.auth.admin = Some(AdminConfig {
            token_issuer: "kargo".into(),
            token_signing_key: "secret".into(),
            token_ttl: std::time::Duration::from_secs(60),
        });
        let mut oidc = OidcConfig::new("https://idp.example.com");
        oidc.client_id = Some("kargo-ui".into());
        oidc.scopes = vec!["openid".into(), "groups".into()];
        config.auth.oidc = Some(oidc);

        assert_eq!(
            serde_json::to_value(PublicServerConfig::from_config(&config)).unwrap(),
            json!({
                "admin_account_enabled": true,
                "oidc_config": {
                    "issuer_url": "https://idp.example.com",
                    "client_id": "kargo-ui",
                    "scopes": ["openid", "groups"]
                }
            })
        );
    }
}
