//! End-to-end authentication tests
//!
//! Drives the full router with `oneshot`:
//! - Exempt routes without credentials
//! - Admin, OIDC and cluster tokens reaching a protected handler
//! - Rejections never leaking into handlers

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use authn_gateway::auth::AdminTokenSigner;
use authn_gateway::config::{
    AdminConfig, AuthConfig, ClusterConfig, Config, OidcConfig, ServiceAccountMapping,
};
use authn_gateway::server::Server;

const ADMIN_KEY: &str = "e2e-admin-signing-key";

fn admin_config() -> AdminConfig {
    AdminConfig {
        token_issuer: "kargo".to_string(),
        token_signing_key: ADMIN_KEY.to_string(),
        token_ttl: Duration::from_secs(3600),
    }
}

async fn app(auth: AuthConfig) -> Router {
    let config = Config {
        auth,
        ..Config::default()
    };
    Server::new(config).await.unwrap().router()
}

async fn get(app: &Router, path: &str, token: Option<&str>) -> Response {
    let mut request = Request::builder().uri(path);
    if let Some(token) = token {
        request = request.header("Authorization", format!("Bearer {token}"));
    }
    app.clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Login hints are served without a token.
#[tokio::test]
async fn test_public_config_needs_no_credentials() {
    // GIVEN: admin tokens enabled, no OIDC
    let app = app(AuthConfig {
        admin: Some(admin_config()),
        ..AuthConfig::default()
    })
    .await;

    // WHEN: the public config is fetched without an Authorization header
    let response = get(&app, "/v1beta1/system/public-server-config", None).await;

    // THEN: it is served
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"admin_account_enabled": true})
    );
}

/// The health check stays reachable even when a garbage token is sent.
#[tokio::test]
async fn test_health_is_exempt_even_with_a_bad_token() {
    let app = app(AuthConfig::default()).await;
    let response = get(&app, "/healthz", Some("definitely-not-a-jwt")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

/// A self-issued admin token reaches the handler as the admin identity.
#[tokio::test]
async fn test_admin_token_reaches_handler_as_admin() {
    // GIVEN: an admin token minted with the configured key and issuer "kargo"
    let app = app(AuthConfig {
        admin: Some(admin_config()),
        ..AuthConfig::default()
    })
    .await;
    let token = AdminTokenSigner::from_config(&admin_config())
        .unwrap()
        .issue(Duration::from_secs(300))
        .unwrap();

    // WHEN: a protected route is called with it
    let response = get(&app, "/v1beta1/whoami", Some(&token)).await;

    // THEN: the handler sees an admin identity
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["is_admin"], true);
    assert_eq!(body["scheme"], "admin");
    assert_eq!(body["username"], "");
    // The raw token never leaves the process.
    assert!(!body.to_string().contains(&token));
}

/// Protected routes reject requests without an Authorization header.
#[tokio::test]
async fn test_missing_header_is_rejected() {
    let app = app(AuthConfig {
        admin: Some(admin_config()),
        ..AuthConfig::default()
    })
    .await;

    let response = get(&app, "/v1beta1/whoami", None).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["www-authenticate"], "Bearer");
    assert_eq!(json_body(response).await, json!({"error": "no token provided"}));
}

/// A forged admin token fails outright; the cluster is never asked.
#[tokio::test]
async fn test_forged_admin_token_does_not_fall_back_to_cluster() {
    // GIVEN: a cluster that accepts anything signed with the wrong key
    let forged = AdminTokenSigner::new("kargo", b"not-the-admin-key")
        .issue(Duration::from_secs(300))
        .unwrap();
    let cluster = common::fake_cluster(forged.clone()).await;
    let app = app(AuthConfig {
        admin: Some(admin_config()),
        cluster: ClusterConfig {
            host: cluster,
            ..ClusterConfig::default()
        },
        ..AuthConfig::default()
    })
    .await;

    // WHEN: the forged admin token is presented
    let response = get(&app, "/v1beta1/whoami", Some(&forged)).await;

    // THEN: the admin verdict is final
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await, json!({"error": "invalid token"}));
}

/// An OIDC token exposes its claims and the service accounts they map to.
#[tokio::test]
async fn test_oidc_token_carries_claims_and_service_accounts() {
    // GIVEN: a reachable provider and a group-to-service-account mapping
    let issuer = common::direct_idp().await;
    let mut oidc = OidcConfig::new(&issuer);
    oidc.username_claim = Some("email".to_string());
    oidc.service_accounts = vec![ServiceAccountMapping {
        namespace: "kargo-demo".to_string(),
        name: "developers".to_string(),
        claims: BTreeMap::from([("groups".to_string(), vec!["devs".to_string()])]),
    }];
    let app = app(AuthConfig {
        oidc: Some(oidc),
        ..AuthConfig::default()
    })
    .await;

    let token = common::sign_es256("es256-primary", "primary", &common::oidc_claims(&issuer));

    // WHEN
    let response = get(&app, "/v1beta1/whoami", Some(&token)).await;

    // THEN
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["scheme"], "oidc");
    assert_eq!(body["is_admin"], false);
    assert_eq!(body["username"], "foo@example.com");
    assert_eq!(body["claims"]["groups"], json!(["devs", "ops"]));
    assert_eq!(
        body["service_accounts"],
        json!({"kargo-demo": [{"namespace": "kargo-demo", "name": "developers"}]})
    );
}

/// An OIDC token signed by a key the provider never published is rejected.
#[tokio::test]
async fn test_oidc_token_signed_by_unknown_key_is_rejected() {
    let issuer = common::direct_idp().await;
    let app = app(AuthConfig {
        oidc: Some(OidcConfig::new(&issuer)),
        ..AuthConfig::default()
    })
    .await;

    // Claims a published kid, but is signed with a different key.
    let token = common::sign_es256("es256-rogue", "primary", &common::oidc_claims(&issuer));
    let response = get(&app, "/v1beta1/whoami", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut expired = common::oidc_claims(&issuer);
    expired["exp"] = json!(chrono::Utc::now().timestamp() - 3600);
    let token = common::sign_es256("es256-primary", "primary", &expired);
    let response = get(&app, "/v1beta1/whoami", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Tokens from an unknown issuer are decided by the cluster.
#[tokio::test]
async fn test_unrecognized_issuer_is_checked_by_the_cluster() {
    // GIVEN: a cluster that accepts exactly one service account token
    let accepted = common::sign_es256(
        "es256-rogue",
        "sa-key",
        &json!({"iss": "https://kubernetes.default.svc.cluster.local", "sub": "system:serviceaccount:kargo:ci"}),
    );
    let cluster = common::fake_cluster(accepted.clone()).await;
    let app = app(AuthConfig {
        admin: Some(admin_config()),
        cluster: ClusterConfig {
            host: cluster,
            ..ClusterConfig::default()
        },
        ..AuthConfig::default()
    })
    .await;

    // THEN: the accepted token yields a bare cluster identity
    let response = get(&app, "/v1beta1/whoami", Some(&accepted)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["scheme"], "cluster");
    assert_eq!(body["is_admin"], false);
    assert_eq!(body["claims"], json!({}));

    // AND: anything else the cluster rejects is a 401
    let other = common::sign_es256(
        "es256-rogue",
        "sa-key",
        &json!({"iss": "https://kubernetes.default.svc.cluster.local", "sub": "someone-else"}),
    );
    let response = get(&app, "/v1beta1/whoami", Some(&other)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// A token that is not a JWT is rejected without a cluster call.
#[tokio::test]
async fn test_malformed_token_is_rejected_without_consulting_the_cluster() {
    let cluster = common::fake_cluster("not-a-jwt").await;
    let app = app(AuthConfig {
        cluster: ClusterConfig {
            host: cluster,
            ..ClusterConfig::default()
        },
        ..AuthConfig::default()
    })
    .await;

    let response = get(&app, "/v1beta1/whoami", Some("not-a-jwt")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await, json!({"error": "invalid token"}));
}
