//! Authentication middleware for Axum
//!
//! Shared-secret bearer-token check applied to every HTTP and WebSocket
//! entry point when a token is configured. Stands in for the
//! client-certificate layer a fronting proxy would normally provide.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// JSON error response for auth failures
#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    error: &'static str,
    code: &'static str,
}

/// Reject requests that do not carry `Authorization: Bearer <token>`.
pub async fn require_bearer(
    State(token): State<Arc<String>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|presented| presented == token.as_str())
        .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(AuthErrorResponse {
                error: "Authentication required. Provide Authorization: Bearer <token>.",
                code: "UNAUTHORIZED",
            }),
        )
            .into_response()
    }
}
