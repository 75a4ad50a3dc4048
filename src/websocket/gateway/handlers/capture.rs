//! Capture task request handlers.

use flamegate_core::CaptureSpec;
use tracing::debug;

use super::super::dispatch::DispatchContext;
use crate::websocket::protocol::ErrorReply;

/// Start a capture task. The task id reaches the client in the first
/// progress update, not in a direct reply.
pub(crate) async fn start(
    ctx: &DispatchContext,
    session_id: &str,
    spec: CaptureSpec,
) -> Option<String> {
    match ctx.engine.clone().start(session_id, spec).await {
        Ok(task) => {
            debug!(session = %session_id, task = %task.id, "capture started");
            None
        }
        Err(e) => Some(ErrorReply::json(e.classified())),
    }
}

/// Stop a task; the finished progress update follows on the bound session.
pub(crate) async fn stop(ctx: &DispatchContext, task_id: &str) -> Option<String> {
    match ctx.engine.stop(task_id).await {
        Ok(()) => None,
        Err(e) => Some(ErrorReply::json(e.classified())),
    }
}

/// Rebind a task to this session; a snapshot is delivered immediately.
pub(crate) async fn observe(
    ctx: &DispatchContext,
    task_id: &str,
    session_id: &str,
) -> Option<String> {
    match ctx.engine.observe(task_id, session_id).await {
        Ok(()) => None,
        Err(e) => Some(ErrorReply::json(e.classified())),
    }
}
