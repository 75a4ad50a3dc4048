//! Capture task model and Task Registry
//!
//! The registry owns every non-transient [`CaptureTask`] record; tasks
//! outlive the sessions that started them and stay listable until their
//! final progress update has been delivered. Transient tasks are never
//! registered; their only consumer is the live session bound to them.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// The process being profiled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    /// OS process id
    pub pid: u32,
    /// Executable name as reported by the process list
    pub execname: String,
    /// Human-readable name shown in task listings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Sampling duration in seconds, echoed into capture metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_time: Option<u64>,
}

/// Status of a capture task. `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Cycles are executing or scheduled
    Running,
    /// No further cycle will run
    Finished,
}

/// One long-running or repeating capture job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureTask {
    /// Globally unique: subject pid + creation timestamp
    pub id: String,
    /// What is being profiled
    pub subject: Subject,
    /// Partition key of the artifact hierarchy (which host this is)
    pub host_id: String,
    /// Capture specification handed to the collector
    pub script: String,
    /// Current state
    pub status: TaskStatus,
    /// Completed cycles
    pub cycles_done: u32,
    /// Target cycle count; `None` runs until stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycles_target: Option<u32>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Results pushed to the bound session only, never persisted
    pub transient: bool,
    /// Classified error that finished the task, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl CaptureTask {
    /// Create a new running task. The id is derived from the subject pid
    /// and the creation timestamp so repeated captures of one process
    /// never collide.
    pub fn new(
        subject: Subject,
        host_id: String,
        script: String,
        cycles_target: Option<u32>,
        transient: bool,
    ) -> Self {
        let created_at = Utc::now();
        let id = format!(
            "{}_{}",
            subject.pid,
            created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        Self {
            id,
            subject,
            host_id,
            script,
            status: TaskStatus::Running,
            cycles_done: 0,
            cycles_target,
            created_at,
            transient,
            last_error: None,
        }
    }

    /// Whether the bounded cycle target has been reached.
    pub fn target_reached(&self) -> bool {
        matches!(self.cycles_target, Some(target) if self.cycles_done >= target)
    }
}

struct TaskRecord {
    task: CaptureTask,
    /// Cancel handle of the in-flight cycle, if one is executing.
    cycle_cancel: Option<CancellationToken>,
}

/// Registry of non-transient capture tasks.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskRecord>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Register a task.
    pub async fn insert(&self, task: CaptureTask) {
        self.tasks.write().await.insert(
            task.id.clone(),
            TaskRecord {
                task,
                cycle_cancel: None,
            },
        );
    }

    /// Snapshot of one task.
    pub async fn get(&self, id: &str) -> Option<CaptureTask> {
        self.tasks.read().await.get(id).map(|r| r.task.clone())
    }

    /// Snapshot of all registered tasks.
    pub async fn list(&self) -> Vec<CaptureTask> {
        self.tasks
            .read()
            .await
            .values()
            .map(|r| r.task.clone())
            .collect()
    }

    /// Number of registered tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether the registry holds no tasks.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Evict a task. Returns the final snapshot if it was present.
    pub async fn remove(&self, id: &str) -> Option<CaptureTask> {
        self.tasks.write().await.remove(id).map(|r| r.task)
    }

    /// Record or clear the cancel handle of the task's in-flight cycle.
    pub async fn set_cycle_cancel(&self, id: &str, cancel: Option<CancellationToken>) {
        if let Some(record) = self.tasks.write().await.get_mut(id) {
            record.cycle_cancel = cancel;
        }
    }

    /// Mutate a task in place and return the updated snapshot. `None` if
    /// the task has been evicted in the meantime.
    pub async fn apply<F>(&self, id: &str, f: F) -> Option<CaptureTask>
    where
        F: FnOnce(&mut CaptureTask),
    {
        let mut tasks = self.tasks.write().await;
        let record = tasks.get_mut(id)?;
        f(&mut record.task);
        Some(record.task.clone())
    }

    /// Stop a task: mark it finished and cancel any in-flight cycle. The
    /// in-flight external process is killed by the supervisor; its cycle
    /// observes `Cancelled` and never reschedules.
    pub async fn finish(&self, id: &str) -> Result<CaptureTask> {
        let mut tasks = self.tasks.write().await;
        let record = tasks
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("task {} not found", id)))?;
        record.task.status = TaskStatus::Finished;
        if let Some(cancel) = record.cycle_cancel.take() {
            cancel.cancel();
        }
        Ok(record.task.clone())
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
