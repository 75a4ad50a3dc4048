//! Gateway WebSocket wire protocol.
//!
//! Inbound requests are a closed tagged-variant type keyed by `kind`,
//! validated at the boundary before dispatch. Progress payloads are
//! produced by the capture engine; this module only defines the request
//! side and the direct replies.

use flamegate_core::Subject;
use serde::{Deserialize, Serialize};

/// Raw ack pushed as soon as a snapshot request starts executing.
pub const SNAPSHOT_STARTED: &str = "started";

/// One decoded client request.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
pub enum ClientRequest {
    /// Start a capture task
    #[serde(rename = "capture.start", rename_all = "camelCase")]
    CaptureStart {
        subject: Subject,
        host_id: String,
        script: String,
        #[serde(default)]
        cycles_target: Option<u32>,
        #[serde(default)]
        transient: bool,
    },
    /// Stop a running task
    #[serde(rename = "capture.stop", rename_all = "camelCase")]
    CaptureStop { task_id: String },
    /// (Re-)bind an existing task to this session
    #[serde(rename = "capture.observe", rename_all = "camelCase")]
    CaptureObserve { task_id: String },
    /// One-shot process memory snapshot
    #[serde(rename = "snapshot")]
    Snapshot { pid: u32 },
    /// Live aggregation streaming until the session closes
    #[serde(rename = "stream.start")]
    StreamStart { script: String },
}

/// Direct error reply on the requesting session.
#[derive(Debug, Serialize)]
pub struct ErrorReply {
    pub error: String,
}

impl ErrorReply {
    /// Serialize an error reply; falls back to a plain string if the
    /// encoder itself fails.
    pub fn json(error: impl Into<String>) -> String {
        let reply = Self {
            error: error.into(),
        };
        serde_json::to_string(&reply).unwrap_or_else(|_| format!("{{\"error\":\"{}\"}}", reply.error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_start_deserialization() {
        let json = r#"{
            "kind": "capture.start",
            "subject": {"pid": 4242, "execname": "node", "displayName": "api", "probeTime": 30},
            "hostId": "host-1",
            "script": "-n 'profile-97 { @[ustack()] = count(); }'",
            "cyclesTarget": 3,
            "transient": false
        }"#;
        let request: ClientRequest = serde_json::from_str(json).unwrap();
        match request {
            ClientRequest::CaptureStart {
                subject,
                host_id,
                cycles_target,
                transient,
                ..
            } => {
                assert_eq!(subject.pid, 4242);
                assert_eq!(subject.display_name.as_deref(), Some("api"));
                assert_eq!(host_id, "host-1");
                assert_eq!(cycles_target, Some(3));
                assert!(!transient);
            }
            other => panic!("expected CaptureStart, got {:?}", other),
        }
    }

    #[test]
    fn test_capture_start_minimal_runs_until_stopped() {
        let json = r#"{
            "kind": "capture.start",
            "subject": {"pid": 1, "execname": "init"},
            "hostId": "h",
            "script": "syscall:::entry"
        }"#;
        let request: ClientRequest = serde_json::from_str(json).unwrap();
        match request {
            ClientRequest::CaptureStart {
                cycles_target,
                transient,
                ..
            } => {
                assert_eq!(cycles_target, None);
                assert!(!transient);
            }
            other => panic!("expected CaptureStart, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_and_observe_take_task_id() {
        let stop: ClientRequest =
            serde_json::from_str(r#"{"kind": "capture.stop", "taskId": "42_t0"}"#).unwrap();
        assert!(matches!(stop, ClientRequest::CaptureStop { task_id } if task_id == "42_t0"));

        let observe: ClientRequest =
            serde_json::from_str(r#"{"kind": "capture.observe", "taskId": "42_t0"}"#).unwrap();
        assert!(matches!(observe, ClientRequest::CaptureObserve { task_id } if task_id == "42_t0"));
    }

    #[test]
    fn test_snapshot_and_stream() {
        let snapshot: ClientRequest =
            serde_json::from_str(r#"{"kind": "snapshot", "pid": 714}"#).unwrap();
        assert!(matches!(snapshot, ClientRequest::Snapshot { pid: 714 }));

        let stream: ClientRequest =
            serde_json::from_str(r#"{"kind": "stream.start", "script": "sched:::on-cpu"}"#)
                .unwrap();
        assert!(matches!(stream, ClientRequest::StreamStart { script } if script == "sched:::on-cpu"));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result =
            serde_json::from_str::<ClientRequest>(r#"{"kind": "capture.pause", "taskId": "x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_reply_shape() {
        let json = ErrorReply::json("NotFound: task 42_t0 not found");
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["error"], "NotFound: task 42_t0 not found");
    }
}
