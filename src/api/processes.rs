//! OS process listing.
//!
//! Read-only projection of the system probe, served so operators can
//! pick a capture subject.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use flamegate_core::SystemProbe;
use tracing::error;

pub async fn list(Extension(probe): Extension<Arc<dyn SystemProbe>>) -> Response {
    match probe.list_processes().await {
        Ok(processes) => Json(processes).into_response(),
        Err(e) => {
            error!(error = %e, "process listing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
