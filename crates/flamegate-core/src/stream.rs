//! Live aggregation streaming
//!
//! The simpler capture mode: a dedicated collector subprocess per
//! session, every stdout line forwarded to the bound session verbatim,
//! and the subprocess guaranteed to die when the session closes. The
//! gateway never interprets the aggregation data.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::sessions::ConnectionRegistry;
use crate::supervisor::{ProcessSpec, ProcessSupervisor};

/// Live collector tuning.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Collector program, invoked as `{command} {args...} {script}`
    pub command: String,
    /// Fixed arguments before the script
    pub args: Vec<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            command: "dtrace".to_string(),
            args: vec!["-q".to_string(), "-n".to_string()],
        }
    }
}

/// Fork the live collector for a session and forward its output lines.
/// The forwarder owns the child; the cancel handle attached to the
/// session kills it on disconnect. Returns the collector pid.
pub async fn start_live_stream(
    supervisor: &ProcessSupervisor,
    connections: Arc<ConnectionRegistry>,
    config: &StreamConfig,
    session_id: &str,
    script: &str,
) -> Result<u32> {
    let spec = ProcessSpec::new(config.command.as_str())
        .args(config.args.iter().cloned())
        .arg(script);
    let mut child = supervisor.spawn(&spec)?;
    let pid = child.pid();
    let stdout = child
        .take_stdout()
        .ok_or_else(|| Error::Process("live collector stdout unavailable".to_string()))?;

    let cancel = CancellationToken::new();
    connections.attach_process(session_id, cancel.clone()).await;

    let session = session_id.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        connections.deliver(&session, line).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(session = %session, error = %e, "live stream read failed");
                        break;
                    }
                }
            }
        }
        child.start_kill();
        child.reap().await;
        connections.clear_process(&session).await;
        debug!(session = %session, pid, "live collector terminated");
    });

    Ok(pid)
}
