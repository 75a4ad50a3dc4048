//! One-shot process snapshot
//!
//! Dumps a process image with an external core-dump tool, uploads it to
//! the artifact store, and reports whether the subject pid still matches
//! a live OS process. The local dump file is deleted on every exit path.

use std::path::PathBuf;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::probe::SystemProbe;
use crate::store::ArtifactStore;
use crate::supervisor::{CleanupGuard, ProcessOutcome, ProcessSpec, ProcessSupervisor};

/// Snapshot tuning.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Core-dump tool invoked as `{command} {pid}`, writing `core.{pid}`
    /// into the working directory (gcore semantics).
    pub command: String,
    /// Directory the dump lands in before upload
    pub work_dir: PathBuf,
    /// Root of the core-dump hierarchy in the store
    pub coredump_root: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            command: "gcore".to_string(),
            work_dir: std::env::temp_dir(),
            coredump_root: "coreDump".to_string(),
        }
    }
}

/// Successful snapshot reply.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotOutcome {
    /// Where the dump was stored
    pub path: String,
    /// Whether the subject pid still matches a live process
    pub still_running: bool,
}

/// Capture, upload, and liveness-check one process snapshot. The cancel
/// token (tied to the requesting session) kills the dump tool if the
/// session goes away first.
pub async fn capture_snapshot(
    supervisor: &ProcessSupervisor,
    store: &dyn ArtifactStore,
    probe: &dyn SystemProbe,
    config: &SnapshotConfig,
    pid: u32,
    cancel: &CancellationToken,
) -> Result<SnapshotOutcome> {
    let local = config.work_dir.join(format!("core.{}", pid));
    let _cleanup = CleanupGuard::new(vec![local.clone()]);

    let spec = ProcessSpec::shell(format!("{} {}", config.command, pid)).cwd(&config.work_dir);
    let child = supervisor.spawn(&spec)?;
    match supervisor.wait(child, cancel, None).await {
        ProcessOutcome::Completed => {}
        ProcessOutcome::Failed { detail } => return Err(Error::Process(detail)),
        ProcessOutcome::Cancelled => return Err(Error::Cancelled),
    }

    let remote = format!("{}/core.{}", config.coredump_root, pid);
    store.put(&local, &remote).await?;
    let still_running = probe.is_running(pid).await?;

    Ok(SnapshotOutcome {
        path: remote,
        still_running,
    })
}
