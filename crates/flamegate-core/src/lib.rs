//! Flamegate Core - Capture Orchestration Engine
//!
//! This crate provides the orchestration layer of the flamegate
//! profiling gateway:
//! - Sessions: the Connection Registry binding transports to tasks
//! - Tasks: the registry of capture tasks that outlive connections
//! - Engine: the sample→render→publish state machine per capture task
//! - Supervisor: spawn/kill/cleanup of the external tools each cycle runs
//! - Collaborators: collector, renderer, artifact store, system probe
//! - Snapshot/Stream: the one-shot core-dump and live-aggregation modes
//!
//! Tracing semantics, image rendering, and storage durability live in
//! the external tools; this crate only orchestrates them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collector;
pub mod engine;
pub mod error;
pub mod probe;
pub mod renderer;
pub mod sessions;
pub mod snapshot;
pub mod store;
pub mod stream;
pub mod supervisor;
pub mod tasks;

pub use collector::{DtraceCollector, TraceCollector};
pub use engine::{CaptureEngine, CaptureSpec, EngineConfig};
pub use error::{Error, Result};
pub use probe::{parse_process_list, ProcessInfo, PsProbe, SystemProbe};
pub use renderer::{FlameRenderer, StackvisRenderer};
pub use sessions::ConnectionRegistry;
pub use snapshot::{capture_snapshot, SnapshotConfig, SnapshotOutcome};
pub use store::{ArtifactStore, FsArtifactStore, HttpArtifactStore};
pub use stream::{start_live_stream, StreamConfig};
pub use supervisor::{
    CleanupGuard, ProcessOutcome, ProcessSpec, ProcessSupervisor, SupervisedChild,
};
pub use tasks::{CaptureTask, Subject, TaskRegistry, TaskStatus};
