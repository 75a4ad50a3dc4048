//! Active capture task listing.
//!
//! Pure projection of the Task Registry: every non-transient task still
//! registered, whatever session (if any) is observing it. No mutation.

use std::sync::Arc;

use axum::response::Json;
use axum::Extension;
use flamegate_core::{CaptureTask, TaskRegistry};

pub async fn list(Extension(tasks): Extension<Arc<TaskRegistry>>) -> Json<Vec<CaptureTask>> {
    Json(tasks.list().await)
}
