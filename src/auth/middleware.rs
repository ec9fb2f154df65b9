//! Axum middleware binding the orchestrator to every request.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use super::authenticator::{Authentication, Authenticator};
use super::error::AuthError;

/// Authenticate the request and attach the resulting [`Identity`] to its
/// extensions before handing it on.
///
/// Rejections short-circuit with `401 Unauthorized`; the body never reveals
/// which scheme was tried or why it failed.
///
/// [`Identity`]: super::identity::Identity
pub async fn authenticate(
    State(authenticator): State<Arc<Authenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let outcome = authenticator
        .authenticate(request.uri().path(), request.headers())
        .await;

    match outcome {
        Ok(Authentication::Exempt) => next.run(request).await,
        Ok(Authentication::Authenticated(identity)) => {
            debug!(
                scheme = ?identity.scheme,
                username = %identity.username,
                admin = identity.is_admin,
                "Request authenticated"
            );
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => {
            match &e {
                AuthError::NoCredential => debug!(path = %request.uri().path(), "No bearer token"),
                _ => warn!(path = %request.uri().path(), error = %e, "Authentication failed"),
            }
            unauthorized_response(e.public_message())
        }
    }
}

/// Create a 401 Unauthorized response.
fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [("WWW-Authenticate", "Bearer")],
        Json(json!({ "error": message })),
    )
        .into_response()
}
