//! Gateway WebSocket connection handling.
//!
//! Terminates one transport session: registers it, pumps inbound frames
//! through dispatch, drains the session's outbound channel, and keeps a
//! ping/pong heartbeat. On close the session is unregistered: its
//! one-shot process is cancelled, its task binding released, and any
//! bound capture task keeps running headless.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Path;
use axum::response::IntoResponse;
use axum::Extension;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::dispatch::{self, DispatchContext};
use crate::websocket::protocol::ErrorReply;

/// How often to send server-side pings.
pub const PING_INTERVAL_SECS: u64 = 20;
/// Close the connection after this many unanswered pings.
pub const MAX_MISSED_PONGS: u32 = 2;
/// Maximum size of a single WS text message (1 MB).
const MAX_MESSAGE_BYTES: usize = 1_048_576;

/// WebSocket upgrade handler for `/ws/:session_id`.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Extension(ctx): Extension<DispatchContext>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_session(socket, ctx, session_id))
}

/// WebSocket upgrade handler for `/ws`, where the server assigns an id.
pub(crate) async fn ws_handler_anonymous(
    ws: WebSocketUpgrade,
    Extension(ctx): Extension<DispatchContext>,
) -> impl IntoResponse {
    let session_id = Uuid::new_v4().to_string();
    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_session(socket, ctx, session_id))
}

async fn handle_session(socket: WebSocket, ctx: DispatchContext, session_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let transport = outbound_tx.clone();
    if let Err(e) = ctx.connections.register(&session_id, outbound_tx).await {
        warn!(session = %session_id, error = %e, "refusing connection");
        let _ = ws_tx.send(Message::Text(ErrorReply::json(e.classified()))).await;
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    }
    info!(session = %session_id, "session opened");

    let mut ping_interval =
        tokio::time::interval(tokio::time::Duration::from_secs(PING_INTERVAL_SECS));
    ping_interval.tick().await; // the first tick is immediate

    let mut pings_unanswered: u32 = 0;

    loop {
        tokio::select! {
            // Client frame
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        pings_unanswered = 0;
                        if let Some(reply) = dispatch::handle_message(&text, &ctx, &session_id).await {
                            if ws_tx.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        pings_unanswered = 0;
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pings_unanswered = 0;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(session = %session_id, error = %e, "websocket error");
                        break;
                    }
                    _ => {}
                }
            }
            // Progress updates, stream lines, and late replies
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(json) => {
                        if ws_tx.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            // Heartbeat
            _ = ping_interval.tick() => {
                if pings_unanswered >= MAX_MISSED_PONGS {
                    info!(session = %session_id, "heartbeat timeout, closing");
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
                pings_unanswered += 1;
            }
        }
    }

    ctx.connections
        .unregister_transport(&session_id, &transport)
        .await;
    info!(session = %session_id, "session closed");
}
