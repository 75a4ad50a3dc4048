//! Request dispatch for the gateway WebSocket.

use std::sync::Arc;

use flamegate_core::{
    ArtifactStore, CaptureEngine, CaptureSpec, ConnectionRegistry, ProcessSupervisor,
    SnapshotConfig, StreamConfig, SystemProbe,
};
use tracing::debug;

use super::handlers;
use crate::websocket::protocol::{ClientRequest, ErrorReply};

/// Shared context for request dispatch. Handlers that outlive the
/// request (snapshot, stream) clone it into their spawned tasks.
#[derive(Clone)]
pub(crate) struct DispatchContext {
    pub engine: Arc<CaptureEngine>,
    pub connections: Arc<ConnectionRegistry>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub store: Arc<dyn ArtifactStore>,
    pub probe: Arc<dyn SystemProbe>,
    pub snapshot: SnapshotConfig,
    pub stream: StreamConfig,
}

/// Decode one inbound text frame and route it. Returns a direct reply
/// when the request calls for one (errors, the snapshot ack); progress
/// flows reach the session through the Connection Registry instead.
pub(crate) async fn handle_message(
    text: &str,
    ctx: &DispatchContext,
    session_id: &str,
) -> Option<String> {
    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            debug!(session = %session_id, error = %e, "malformed request");
            return Some(ErrorReply::json(format!("BadRequest: {}", e)));
        }
    };

    match request {
        ClientRequest::CaptureStart {
            subject,
            host_id,
            script,
            cycles_target,
            transient,
        } => {
            let spec = CaptureSpec {
                subject,
                host_id,
                script,
                cycles_target,
                transient,
            };
            handlers::capture::start(ctx, session_id, spec).await
        }
        ClientRequest::CaptureStop { task_id } => handlers::capture::stop(ctx, &task_id).await,
        ClientRequest::CaptureObserve { task_id } => {
            handlers::capture::observe(ctx, &task_id, session_id).await
        }
        ClientRequest::Snapshot { pid } => handlers::snapshot::capture(ctx, session_id, pid).await,
        ClientRequest::StreamStart { script } => {
            handlers::stream::start(ctx, session_id, &script).await
        }
    }
}
