//! Live aggregation stream handler.

use std::sync::Arc;

use flamegate_core::start_live_stream;
use tracing::debug;

use super::super::dispatch::DispatchContext;
use crate::websocket::protocol::ErrorReply;

pub(crate) async fn start(
    ctx: &DispatchContext,
    session_id: &str,
    script: &str,
) -> Option<String> {
    match start_live_stream(
        &ctx.supervisor,
        Arc::clone(&ctx.connections),
        &ctx.stream,
        session_id,
        script,
    )
    .await
    {
        Ok(pid) => {
            debug!(session = %session_id, pid, "live stream started");
            None
        }
        Err(e) => Some(ErrorReply::json(e.classified())),
    }
}
