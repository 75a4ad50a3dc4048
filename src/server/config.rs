//! Server configuration types
//!
//! Contains all configuration structures for the flamegate gateway.

use std::path::PathBuf;
use std::time::Duration;

use flamegate_core::{EngineConfig, SnapshotConfig, StreamConfig};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub snapshot: SnapshotAppConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

/// Shared-secret authentication. When no token is configured every
/// request is accepted; front the gateway with mutual TLS in that case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token: Option<String>,
}

/// Artifact store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local directory or mounted share
    Fs,
    /// HTTP object store (PUT against a base URL)
    Http,
}

/// Artifact store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Root directory of the fs backend
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Base URL of the http backend
    #[serde(default)]
    pub url: Option<String>,
    /// Bearer token for the http backend
    #[serde(default)]
    pub token: Option<String>,
    /// Hierarchy prefix for flame-graph artifacts
    #[serde(default = "default_flamegraph_path")]
    pub flamegraph_path: String,
    /// Hierarchy prefix for core dumps
    #[serde(default = "default_coredump_path")]
    pub coredump_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            root: default_storage_root(),
            url: None,
            token: None,
            flamegraph_path: default_flamegraph_path(),
            coredump_path: default_coredump_path(),
        }
    }
}

fn default_backend() -> StorageBackend {
    StorageBackend::Fs
}

fn default_storage_root() -> String {
    "/var/tmp/flamegate".to_string()
}

fn default_flamegraph_path() -> String {
    "flameGraph".to_string()
}

fn default_coredump_path() -> String {
    "coreDump".to_string()
}

/// Capture pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Sampling tool; the operator script is appended verbatim
    #[serde(default = "default_collector_command")]
    pub collector_command: String,
    /// Stack-to-image renderer
    #[serde(default = "default_renderer_command")]
    pub renderer_command: String,
    /// Renderer arguments (raw samples on stdin, image on stdout)
    #[serde(default = "default_renderer_args")]
    pub renderer_args: Vec<String>,
    /// Temp-file directory; unset uses the system temp dir
    #[serde(default)]
    pub work_dir: Option<String>,
    /// Kill a cycle's external process after this many seconds (0 = never)
    #[serde(default)]
    pub cycle_timeout_secs: u64,
    /// Refuse new capture tasks beyond this many running (0 = unlimited)
    #[serde(default)]
    pub max_concurrent_tasks: usize,
    /// Live-aggregation collector
    #[serde(default)]
    pub live: LiveConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            collector_command: default_collector_command(),
            renderer_command: default_renderer_command(),
            renderer_args: default_renderer_args(),
            work_dir: None,
            cycle_timeout_secs: 0,
            max_concurrent_tasks: 0,
            live: LiveConfig::default(),
        }
    }
}

fn default_collector_command() -> String {
    "dtrace".to_string()
}

fn default_renderer_command() -> String {
    "stackvis".to_string()
}

fn default_renderer_args() -> Vec<String> {
    vec!["dtrace".to_string(), "flamegraph-svg".to_string()]
}

/// Live-aggregation collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    #[serde(default = "default_collector_command")]
    pub command: String,
    #[serde(default = "default_live_args")]
    pub args: Vec<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            command: default_collector_command(),
            args: default_live_args(),
        }
    }
}

fn default_live_args() -> Vec<String> {
    vec!["-q".to_string(), "-n".to_string()]
}

/// Core-dump snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotAppConfig {
    /// Dump tool, invoked as `{command} {pid}` in the work dir
    #[serde(default = "default_snapshot_command")]
    pub command: String,
}

impl Default for SnapshotAppConfig {
    fn default() -> Self {
        Self {
            command: default_snapshot_command(),
        }
    }
}

fn default_snapshot_command() -> String {
    "gcore".to_string()
}

impl AppConfig {
    /// Temp-file directory for capture cycles and snapshots.
    pub fn work_dir(&self) -> PathBuf {
        self.capture
            .work_dir
            .as_deref()
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Engine tuning derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            work_dir: self.work_dir(),
            flamegraph_root: self.storage.flamegraph_path.clone(),
            cycle_timeout: match self.capture.cycle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            max_concurrent_tasks: match self.capture.max_concurrent_tasks {
                0 => None,
                max => Some(max),
            },
        }
    }

    /// Snapshot tuning derived from this configuration.
    pub fn snapshot_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            command: self.snapshot.command.clone(),
            work_dir: self.work_dir(),
            coredump_root: self.storage.coredump_path.clone(),
        }
    }

    /// Live-stream tuning derived from this configuration.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            command: self.capture.live.command.clone(),
            args: self.capture.live.args.clone(),
        }
    }
}
