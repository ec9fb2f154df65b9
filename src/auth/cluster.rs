//! Fallback verification through the cluster's own authentication.
//!
//! The caller's token is presented, unmodified, to the cluster's self-review
//! endpoint. Any 2xx is proof the token is valid; anything else is a
//! rejection. One call per attempt, no retries. Dropping the returned future
//! aborts the in-flight request.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::error::AuthError;
use super::identity::Identity;
use super::trust::{http_client, load_trust_anchors};
use crate::config::ClusterConfig;
use crate::Result;

/// Verifies tokens the cluster recognizes natively.
#[async_trait]
pub trait ClusterVerifier: Send + Sync {
    /// Ask the cluster whether `token` is valid.
    async fn verify(&self, token: &str) -> std::result::Result<Identity, AuthError>;
}

/// [`ClusterVerifier`] that posts a `SelfSubjectReview` with the caller's token.
pub struct SelfReviewClusterVerifier {
    endpoint: String,
    http: reqwest::Client,
}

impl SelfReviewClusterVerifier {
    /// Create a verifier posting to `endpoint` with `http`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
        }
    }

    /// Create a verifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster CA bundle cannot be loaded or the HTTP
    /// client cannot be built.
    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        let anchors = load_trust_anchors(config.ca_cert_path.as_deref())?;
        let http = http_client(anchors.as_deref(), config.timeout)?;
        Ok(Self::new(review_endpoint(config), http))
    }

    /// The URL tokens are presented to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn review_endpoint(config: &ClusterConfig) -> String {
    let host = config.host.trim_end_matches('/');
    let path = config.review_path.trim_start_matches('/');
    format!("{host}/{path}")
}

#[async_trait]
impl ClusterVerifier for SelfReviewClusterVerifier {
    async fn verify(&self, token: &str) -> std::result::Result<Identity, AuthError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&json!({
                "apiVersion": "authentication.k8s.io/v1",
                "kind": "SelfSubjectReview",
            }))
            .send()
            .await
            .map_err(|e| AuthError::verification(format!("cluster check failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = %status, "Cluster accepted token");
            Ok(Identity::cluster(token))
        } else {
            Err(AuthError::verification(format!(
                "cluster rejected token: {status}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use axum::{Router, http::HeaderMap, http::StatusCode, routing::post};
    use tokio::net::TcpListener;

    const REVIEW_PATH: &str = "/apis/authentication.k8s.io/v1/selfsubjectreviews";

    async fn fake_cluster(slow: bool) -> String {
        let app = Router::new().route(
            REVIEW_PATH,
            post(move |headers: HeaderMap| async move {
                if slow {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                    Some("Bearer cluster-token") => StatusCode::CREATED,
                    Some("Bearer forbidden-token") => StatusCode::FORBIDDEN,
                    _ => StatusCode::UNAUTHORIZED,
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn verifier(host: String, timeout: Duration) -> SelfReviewClusterVerifier {
        SelfReviewClusterVerifier::from_config(&ClusterConfig {
            host,
            timeout,
            ..ClusterConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn endpoint_joins_host_and_path() {
        let config = ClusterConfig {
            host: "https://10.0.0.1:6443/".to_string(),
            ..ClusterConfig::default()
        };
        assert_eq!(
            review_endpoint(&config),
            "https://10.0.0.1:6443/apis/authentication.k8s.io/v1/selfsubjectreviews"
        );
    }

    #[tokio::test]
    async fn accepted_token_yields_cluster_identity() {
        let v = verifier(fake_cluster(false).await, Duration::from_secs(5));

        let id = v.verify("cluster-token").await.unwrap();

        assert_eq!(id.bearer_token, "cluster-token");
        assert!(!id.is_admin);
        assert!(id.username.is_empty());
        assert!(id.claims.is_empty());
    }

    #[tokio::test]
    async fn rejection_status_is_kept_for_diagnostics() {
        let v = verifier(fake_cluster(false).await, Duration::from_secs(5));

        let err = v.verify("forbidden-token").await.unwrap_err();
        assert!(err.to_string().contains("403"), "{err}");

        let err = v.verify("unknown-token").await.unwrap_err();
        assert!(err.to_string().contains("401"), "{err}");
    }

    #[tokio::test]
    async fn unreachable_cluster_is_a_rejection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let v = verifier(format!("http://{addr}"), Duration::from_secs(2));
        assert!(matches!(
            v.verify("cluster-token").await,
            Err(AuthError::VerificationFailed(_))
        ));
    }

    #[tokio::test]
    async fn configured_timeout_bounds_the_call() {
        let v = verifier(fake_cluster(true).await, Duration::from_millis(100));
        assert!(v.verify("cluster-token").await.is_err());
    }

    /// Cluster whose review handler takes `delay`, recording when it starts
    /// and whether it ever runs to completion.
    async fn observed_cluster(delay: Duration) -> (String, Arc<AtomicBool>, Arc<AtomicBool>) {
        let started = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicBool::new(false));
        let (s, c) = (Arc::clone(&started), Arc::clone(&completed));
        let app = Router::new().route(
            REVIEW_PATH,
            post(move || async move {
                s.store(true, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                c.store(true, Ordering::SeqCst);
                StatusCode::CREATED
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), started, completed)
    }

    #[tokio::test]
    async fn dropping_the_future_cancels_the_call() {
        let (host, started, completed) = observed_cluster(Duration::from_millis(500)).await;
        let v = verifier(host, Duration::from_secs(30));

        let outcome = tokio::time::timeout(Duration::from_millis(200), v.verify("cluster-token")).await;
        assert!(outcome.is_err());
        assert!(started.load(Ordering::SeqCst), "request never reached the cluster");

        // Dropping the request closes the connection, so the server abandons
        // the handler before its delay elapses.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(!completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn completed_call_runs_the_handler_to_the_end() {
        let (host, started, completed) = observed_cluster(Duration::from_millis(50)).await;
        let v = verifier(host, Duration::from_secs(5));

        assert!(v.verify("cluster-token").await.is_ok());
        assert!(started.load(Ordering::SeqCst));
        assert!(completed.load(Ordering::SeqCst));
    }
}
