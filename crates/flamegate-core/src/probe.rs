//! System probe collaborator
//!
//! Read-only process introspection: the OS process listing served on the
//! auxiliary endpoint, and the liveness check the snapshot reply carries.

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use crate::error::{Error, Result};

/// One entry of the OS process listing.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    /// OS process id
    pub pid: u32,
    /// Full command line
    pub cmd: String,
    /// Executable base name (sudo prefix stripped)
    pub execname: String,
}

/// Process/system introspection.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    /// List OS processes.
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>>;

    /// Whether a process with this pid is currently running.
    async fn is_running(&self, pid: u32) -> Result<bool>;
}

/// ps(1)-backed probe.
pub struct PsProbe {
    program: String,
    args: Vec<String>,
}

impl PsProbe {
    /// Probe running `ps -e -o pid,args`.
    pub fn new() -> Self {
        Self {
            program: "ps".to_string(),
            args: vec!["-e".into(), "-o".into(), "pid,args".into()],
        }
    }
}

impl Default for PsProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemProbe for PsProbe {
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| Error::Process(format!("{}: {}", self.program, e)))?;
        if !output.status.success() {
            return Err(Error::Process(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_process_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn is_running(&self, pid: u32) -> Result<bool> {
        Ok(self.list_processes().await?.iter().any(|p| p.pid == pid))
    }
}

/// Parse `ps -e -o pid,args` output: header line dropped, whitespace
/// collapsed, `sudo` prefixes stripped from the executable name, and the
/// executable reduced to its base name.
pub fn parse_process_list(stdout: &str) -> Vec<ProcessInfo> {
    stdout
        .trim()
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid: u32 = parts.next()?.parse().ok()?;
            let cmd = parts.collect::<Vec<_>>().join(" ");
            if cmd.is_empty() {
                return None;
            }
            let first = cmd.strip_prefix("sudo ").unwrap_or(cmd.as_str());
            let first = first.split(' ').next().unwrap_or(first);
            let execname = first.rsplit('/').next().unwrap_or(first).to_string();
            Some(ProcessInfo { pid, cmd, execname })
        })
        .collect()
}
