//! Trace collector collaborator
//!
//! The collector is an external tool (dtrace by default). The gateway
//! never interprets capture scripts; it only builds the invocation and
//! hands it to the Process Supervisor.

use std::path::Path;

use crate::supervisor::ProcessSpec;

/// Builds the sampling invocation for one capture cycle.
pub trait TraceCollector: Send + Sync {
    /// Invocation that runs `script` and writes raw stack output to
    /// `raw_path`.
    fn collect_spec(&self, script: &str, raw_path: &Path) -> ProcessSpec;
}

/// dtrace-style collector. The operator script is a full argument string
/// (probe specifiers, predicates, quoting), so the invocation goes
/// through the shell with stdout redirected to the cycle's raw file.
pub struct DtraceCollector {
    command: String,
}

impl DtraceCollector {
    /// Collector running the given command (normally `dtrace`).
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl TraceCollector for DtraceCollector {
    fn collect_spec(&self, script: &str, raw_path: &Path) -> ProcessSpec {
        ProcessSpec::shell(format!("{} {}", self.command, script)).stdout_file(raw_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{ProcessOutcome, ProcessSupervisor};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_collect_spec_runs_script_through_shell() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("t.out");

        // Stand-in collector command; the script goes through unquoted
        // exactly as the operator wrote it.
        let collector = DtraceCollector::new("echo");
        let spec = collector.collect_spec("-n 'profile-97 { @[ustack()] = count(); }'", &raw);

        let sup = ProcessSupervisor::new();
        let child = sup.spawn(&spec).unwrap();
        let outcome = sup.wait(child, &CancellationToken::new(), None).await;
        assert!(matches!(outcome, ProcessOutcome::Completed));

        let written = std::fs::read_to_string(&raw).unwrap();
        assert!(written.contains("profile-97"));
    }
}
