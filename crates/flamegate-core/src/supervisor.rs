//! Process Supervisor
//!
//! Runs the external tools every capture cycle depends on: spawns a
//! command described by a [`ProcessSpec`], waits for it under cooperative
//! cancellation, and reports a three-state [`ProcessOutcome`] so callers
//! can tell "we stopped it" apart from "it failed on its own".
//!
//! Temp-file cleanup is handled by [`CleanupGuard`], a scope guard that
//! deletes its paths exactly once on every exit path of the owning cycle.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Cap on stderr carried into a failure detail string.
const STDERR_DETAIL_LIMIT: usize = 2048;

/// Declarative description of an external command.
///
/// Operator-supplied capture scripts are run through `/bin/sh -c` (the
/// script text is the whole point of the tool); fixed tool invocations
/// use the program/args form.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    program: String,
    args: Vec<String>,
    shell: bool,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
    cwd: Option<PathBuf>,
}

impl ProcessSpec {
    /// A command executed directly (no shell).
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            shell: false,
            stdin: None,
            stdout: None,
            cwd: None,
        }
    }

    /// A command line executed via `/bin/sh -c`.
    pub fn shell(line: impl Into<String>) -> Self {
        Self {
            program: line.into(),
            args: Vec::new(),
            shell: true,
            stdin: None,
            stdout: None,
            cwd: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed the process from a file instead of `/dev/null`.
    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Redirect stdout into a file instead of a pipe.
    pub fn stdout_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    /// Working directory for the process.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// The program or shell line, for logging.
    pub fn display(&self) -> &str {
        &self.program
    }
}

/// Ownership of one spawned external process.
pub struct SupervisedChild {
    pid: u32,
    child: Child,
}

impl SupervisedChild {
    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Take the stdout pipe (only present when stdout was not redirected
    /// to a file). Used by the live-stream mode to forward output lines.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Send a kill signal without waiting. Idempotent if already exited.
    pub fn start_kill(&mut self) {
        let _ = self.child.start_kill();
    }

    /// Reap the process. Used by callers that bypass [`ProcessSupervisor::wait`].
    pub async fn reap(&mut self) {
        let _ = self.child.wait().await;
    }
}

/// How a supervised process ended.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Exited with status zero.
    Completed,
    /// Exited non-zero, failed to run, or overran the configured timeout.
    Failed {
        /// Exit description plus captured stderr.
        detail: String,
    },
    /// Killed because the supervisor was asked to cancel it.
    Cancelled,
}

/// Spawns and supervises external processes.
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    /// Create a supervisor.
    pub fn new() -> Self {
        Self
    }

    /// Start the command asynchronously. Never blocks beyond issuing the
    /// spawn; failures to start are reported as [`Error::Process`].
    pub fn spawn(&self, spec: &ProcessSpec) -> Result<SupervisedChild> {
        let mut cmd = if spec.shell {
            let mut c = Command::new("/bin/sh");
            c.arg("-c").arg(&spec.program);
            c
        } else {
            let mut c = Command::new(&spec.program);
            c.args(&spec.args);
            c
        };

        let stdin = match &spec.stdin {
            Some(path) => Stdio::from(
                std::fs::File::open(path)
                    .map_err(|e| Error::Process(format!("open {}: {}", path.display(), e)))?,
            ),
            None => Stdio::null(),
        };
        let stdout = match &spec.stdout {
            Some(path) => Stdio::from(
                std::fs::File::create(path)
                    .map_err(|e| Error::Process(format!("create {}: {}", path.display(), e)))?,
            ),
            None => Stdio::piped(),
        };

        cmd.stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::Process(format!("spawn {}: {}", spec.display(), e)))?;
        let pid = child
            .id()
            .ok_or_else(|| Error::Process("failed to get process id".to_string()))?;

        debug!(pid, command = %spec.display(), "spawned external process");
        Ok(SupervisedChild { pid, child })
    }

    /// Suspend until the process exits, the token is cancelled, or the
    /// optional timeout elapses. Cancellation kills the process and
    /// reports [`ProcessOutcome::Cancelled`]; a timeout also kills it but
    /// reports a failure, since no operator asked for the stop.
    pub async fn wait(
        &self,
        mut sc: SupervisedChild,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> ProcessOutcome {
        enum WaitEvent {
            Exited(std::io::Result<std::process::ExitStatus>),
            Cancelled,
            TimedOut,
        }

        let stderr = sc.child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let timeout_sleep = tokio::time::sleep(timeout.unwrap_or(Duration::ZERO));
        tokio::pin!(timeout_sleep);

        // Child::wait is cancel safe, so the select can drop it and the
        // cancellation/timeout arms are free to kill and reap after.
        let event = tokio::select! {
            status = sc.child.wait() => WaitEvent::Exited(status),
            _ = cancel.cancelled() => WaitEvent::Cancelled,
            () = &mut timeout_sleep, if timeout.is_some() => WaitEvent::TimedOut,
        };

        match event {
            WaitEvent::Exited(status) => {
                let stderr = stderr_task.await.unwrap_or_default();
                match status {
                    Ok(s) if s.success() => ProcessOutcome::Completed,
                    Ok(s) => ProcessOutcome::Failed {
                        detail: failure_detail(&format!("exited with {}", s), &stderr),
                    },
                    Err(e) => ProcessOutcome::Failed {
                        detail: format!("wait failed: {}", e),
                    },
                }
            }
            WaitEvent::Cancelled => {
                debug!(pid = sc.pid, "cancelling supervised process");
                sc.start_kill();
                sc.reap().await;
                stderr_task.abort();
                ProcessOutcome::Cancelled
            }
            WaitEvent::TimedOut => {
                warn!(pid = sc.pid, ?timeout, "supervised process overran timeout");
                sc.start_kill();
                sc.reap().await;
                stderr_task.abort();
                ProcessOutcome::Failed {
                    detail: format!("timed out after {}s", timeout.unwrap_or_default().as_secs()),
                }
            }
        }
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn failure_detail(status: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        status.to_string()
    } else {
        let detail: String = stderr.chars().take(STDERR_DETAIL_LIMIT).collect();
        format!("{}: {}", status, detail)
    }
}

/// Deletes its paths when dropped, on every exit path of the owning
/// scope. Deletion failures are logged, never propagated.
pub struct CleanupGuard {
    paths: Vec<PathBuf>,
}

impl CleanupGuard {
    /// Guard the given temp paths.
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            remove_quietly(path);
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to delete temp file");
        }
    }
}
