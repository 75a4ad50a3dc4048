//! Gateway WebSocket handler.
//!
//! Flow:
//! 1. Client connects to `/ws/{session_id}` (or `/ws` for a server-assigned id)
//! 2. The session is registered; a duplicate live id is refused
//! 3. Tagged JSON requests dispatch to capture / snapshot / stream handlers
//! 4. Progress updates and stream lines are pushed as they happen
//! 5. On close the session's one-shot process dies; capture tasks survive

pub(crate) mod connection;
mod dispatch;
mod handlers;

pub(crate) use connection::{ws_handler, ws_handler_anonymous};
pub(crate) use dispatch::DispatchContext;
