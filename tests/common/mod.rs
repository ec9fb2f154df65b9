//! Shared helpers: fixture keys and throwaway HTTP servers standing in for
//! the identity provider and the cluster API.

#![allow(dead_code)]

use std::net::SocketAddr;

use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rcgen::{
    BasicConstraints, CertificateParams, CertifiedIssuer, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub const CLUSTER_REVIEW_PATH: &str = "/apis/authentication.k8s.io/v1/selfsubjectreviews";

/// Contents of `tests/fixtures/{name}`.
pub fn fixture(name: &str) -> Vec<u8> {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read(path).unwrap()
}

/// Public JWK of a fixture key.
pub fn jwk(name: &str) -> Value {
    serde_json::from_slice(&fixture(&format!("{name}.jwk.json"))).unwrap()
}

/// Sign `claims` as ES256 with the fixture private key `key`, tagged `kid`.
pub fn sign_es256(key: &str, kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_ec_pem(&fixture(&format!("{key}.pem"))).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// Bind an ephemeral port and return the listener with its base URL.
pub async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    (listener, url)
}

/// Serve `app` on `listener` in the background.
pub fn serve(listener: TcpListener, app: Router) {
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
}

/// Serve `app` over HTTPS on an ephemeral port, with a certificate for
/// `127.0.0.1` issued by a throwaway CA.
///
/// Returns the base URL and the CA certificate as PEM.
pub async fn serve_https(app: Router) -> (String, String) {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "authn-gateway test CA");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca = CertifiedIssuer::self_signed(ca_params, KeyPair::generate().unwrap()).unwrap();

    let mut leaf_params = CertificateParams::new(vec!["127.0.0.1".to_string()]).unwrap();
    leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    let leaf_key = KeyPair::generate().unwrap();
    let leaf = leaf_params.signed_by(&leaf_key, &*ca).unwrap();

    let config = RustlsConfig::from_pem(
        leaf.pem().into_bytes(),
        leaf_key.serialize_pem().into_bytes(),
    )
    .await
    .unwrap();
    let handle: Handle<SocketAddr> = Handle::new();
    let server = axum_server::bind_rustls(SocketAddr::from(([127, 0, 0, 1], 0)), config)
        .handle(handle.clone());
    tokio::spawn(async move { server.serve(app.into_make_service()).await.unwrap() });

    let addr = handle.listening().await.unwrap();
    (format!("https://{addr}"), ca.pem())
}

/// Identity provider publishing `issuer` and `jwks_uri` under `prefix`,
/// serving the primary fixture key at `{prefix}/keys`.
pub fn idp_router(prefix: &str, issuer: &str, jwks_uri: &str) -> Router {
    let document = json!({
        "issuer": issuer,
        "jwks_uri": jwks_uri,
        "id_token_signing_alg_values_supported": ["ES256"],
    });
    let keys = json!({ "keys": [jwk("es256-primary")] });

    Router::new()
        .route(
            &format!("{prefix}/.well-known/openid-configuration"),
            get(move || async move { Json(document) }),
        )
        .route(&format!("{prefix}/keys"), get(move || async move { Json(keys) }))
}

/// Provider reached directly: its reported issuer is its own URL.
pub async fn direct_idp() -> String {
    let (listener, url) = bind().await;
    serve(listener, idp_router("", &url, &format!("{url}/keys")));
    url
}

/// Cluster API accepting only `accepted` at the self-review endpoint.
pub async fn fake_cluster(accepted: impl Into<String>) -> String {
    let expected = format!("Bearer {}", accepted.into());
    let app = Router::new().route(
        CLUSTER_REVIEW_PATH,
        post(move |headers: HeaderMap| async move {
            match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                Some(value) if value == expected => StatusCode::CREATED,
                _ => StatusCode::UNAUTHORIZED,
            }
        }),
    );
    let (listener, url) = bind().await;
    serve(listener, app);
    url
}

/// Claims of a valid OIDC token from `issuer`.
pub fn oidc_claims(issuer: &str) -> Value {
    json!({
        "iss": issuer,
        "sub": "CgNmb28SBWxvY2Fs",
        "email": "foo@example.com",
        "groups": ["devs", "ops"],
        "exp": chrono::Utc::now().timestamp() + 3600,
    })
}
