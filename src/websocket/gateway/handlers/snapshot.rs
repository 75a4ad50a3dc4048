//! One-shot snapshot request handler.
//!
//! Acks `started` immediately, then runs dump→upload→liveness-check in a
//! spawned task so the session keeps serving other requests. The dump
//! process is attached to the session and dies with it.

use flamegate_core::capture_snapshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::super::dispatch::DispatchContext;
use crate::websocket::protocol::{ErrorReply, SNAPSHOT_STARTED};

pub(crate) async fn capture(ctx: &DispatchContext, session_id: &str, pid: u32) -> Option<String> {
    let cancel = CancellationToken::new();
    ctx.connections
        .attach_process(session_id, cancel.clone())
        .await;

    let ctx = ctx.clone();
    let session = session_id.to_string();
    tokio::spawn(async move {
        let result = capture_snapshot(
            &ctx.supervisor,
            ctx.store.as_ref(),
            ctx.probe.as_ref(),
            &ctx.snapshot,
            pid,
            &cancel,
        )
        .await;

        let reply = match result {
            Ok(outcome) => serde_json::to_string(&outcome)
                .unwrap_or_else(|e| ErrorReply::json(e.to_string())),
            Err(e) => {
                warn!(session = %session, pid, error = %e, "snapshot failed");
                ErrorReply::json(e.classified())
            }
        };
        ctx.connections.deliver(&session, reply).await;
        ctx.connections.clear_process(&session).await;
    });

    Some(SNAPSHOT_STARTED.to_string())
}
