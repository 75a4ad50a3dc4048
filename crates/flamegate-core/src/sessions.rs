//! Connection Registry
//!
//! Tracks each live remote connection by session id. A session owns its
//! outbound transport handle (an unbounded channel drained by the socket
//! write loop), at most one bound capture task, and optionally the cancel
//! handle of a one-shot process started on its behalf (snapshot, live
//! stream).
//!
//! Delivery is best-effort: the capture engine keeps producing
//! whether or not anyone is listening, and a task is never cancelled just
//! because its session went away.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// One active transport connection.
struct Session {
    bound_task_id: Option<String>,
    outbound: mpsc::UnboundedSender<String>,
    supervised: Option<CancellationToken>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    /// task id → session id currently receiving its progress
    bindings: HashMap<String, String>,
}

/// Registry of live sessions and task↔session bindings.
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a session. Fails with [`Error::DuplicateSession`] when the
    /// id is taken by a session whose transport is still writable; a dead
    /// transport is replaced in place, preserving the task binding so a
    /// reconnecting client resumes observing.
    pub async fn register(
        &self,
        session_id: &str,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.sessions.get_mut(session_id) {
            if !existing.outbound.is_closed() {
                return Err(Error::DuplicateSession(session_id.to_string()));
            }
            existing.outbound = outbound;
            return Ok(());
        }
        inner.sessions.insert(
            session_id.to_string(),
            Session {
                bound_task_id: None,
                outbound,
                supervised: None,
            },
        );
        Ok(())
    }

    /// Remove a session. Cancels its supervised one-shot process and
    /// unbinds its task; the task itself keeps running headless.
    pub async fn unregister(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.remove(session_id) else {
            return;
        };
        if let Some(cancel) = session.supervised {
            cancel.cancel();
        }
        if let Some(task_id) = session.bound_task_id {
            if inner.bindings.get(&task_id).map(String::as_str) == Some(session_id) {
                inner.bindings.remove(&task_id);
            }
        }
    }

    /// Remove a session only if it still owns the given transport
    /// handle. A session that reconnected in the meantime (replacing a
    /// dead handle) is left alone, so a stale connection loop winding
    /// down cannot tear down its successor.
    pub async fn unregister_transport(
        &self,
        session_id: &str,
        transport: &mpsc::UnboundedSender<String>,
    ) {
        let owns = {
            let inner = self.inner.read().await;
            inner
                .sessions
                .get(session_id)
                .map(|s| s.outbound.same_channel(transport))
                .unwrap_or(false)
        };
        if owns {
            self.unregister(session_id).await;
        }
    }

    /// Bind a task to a session, replacing any prior binding on either
    /// side. No-op if the session is gone.
    pub async fn bind(&self, task_id: &str, session_id: &str) {
        let mut inner = self.inner.write().await;
        let inner = &mut *inner;

        let Some(session) = inner.sessions.get_mut(session_id) else {
            return;
        };
        let previous_task = session.bound_task_id.replace(task_id.to_string());

        // The session stops observing whatever it watched before.
        if let Some(prev) = previous_task {
            if prev != task_id
                && inner.bindings.get(&prev).map(String::as_str) == Some(session_id)
            {
                inner.bindings.remove(&prev);
            }
        }

        // The task's previous observer, if any, loses the binding.
        if let Some(old_session) = inner
            .bindings
            .insert(task_id.to_string(), session_id.to_string())
        {
            if old_session != session_id {
                if let Some(other) = inner.sessions.get_mut(&old_session) {
                    if other.bound_task_id.as_deref() == Some(task_id) {
                        other.bound_task_id = None;
                    }
                }
            }
        }
    }

    /// Whether some live session is currently bound to the task.
    pub async fn is_bound(&self, task_id: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .bindings
            .get(task_id)
            .and_then(|sid| inner.sessions.get(sid))
            .map(|s| !s.outbound.is_closed())
            .unwrap_or(false)
    }

    /// Best-effort push to a session. Returns whether the payload was
    /// accepted by a live transport; a missing session or closed channel
    /// is a silent no-op.
    pub async fn deliver(&self, session_id: &str, payload: String) -> bool {
        let inner = self.inner.read().await;
        match inner.sessions.get(session_id) {
            Some(session) => session.outbound.send(payload).is_ok(),
            None => false,
        }
    }

    /// Best-effort push to whichever session is bound to the task.
    pub async fn deliver_to_task(&self, task_id: &str, payload: String) -> bool {
        let inner = self.inner.read().await;
        inner
            .bindings
            .get(task_id)
            .and_then(|sid| inner.sessions.get(sid))
            .map(|session| session.outbound.send(payload).is_ok())
            .unwrap_or(false)
    }

    /// Attach the cancel handle of a one-shot process to the session, so
    /// a disconnect terminates it. Replaces (and cancels) any prior one.
    pub async fn attach_process(&self, session_id: &str, cancel: CancellationToken) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.get_mut(session_id) {
            if let Some(previous) = session.supervised.replace(cancel) {
                previous.cancel();
            }
        } else {
            // Session already gone: the process must not outlive it.
            cancel.cancel();
        }
    }

    /// Detach the one-shot process handle after it completed on its own.
    pub async fn clear_process(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.supervised = None;
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
