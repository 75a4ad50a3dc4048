//! Capture task state machine
//!
//! Drives each capture task through repeated sample→render→publish
//! cycles. Cycles of one task are strictly sequential (they share
//! task-scoped temp files); different tasks interleave freely. A cycle
//! failure finishes only its own task, classified by pipeline stage, and
//! an operator stop mid-cycle surfaces as `Cancelled` rather than a tool
//! failure.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::TraceCollector;
use crate::error::{Error, Result};
use crate::renderer::FlameRenderer;
use crate::sessions::ConnectionRegistry;
use crate::store::ArtifactStore;
use crate::supervisor::{CleanupGuard, ProcessOutcome, ProcessSpec, ProcessSupervisor};
use crate::tasks::{CaptureTask, Subject, TaskRegistry, TaskStatus};

/// Parameters of a `capture.start` request, validated at the boundary.
#[derive(Debug, Clone)]
pub struct CaptureSpec {
    /// The process being profiled
    pub subject: Subject,
    /// Partition key of the artifact hierarchy
    pub host_id: String,
    /// Capture specification handed to the collector
    pub script: String,
    /// Cycle target; `None` runs until stopped
    pub cycles_target: Option<u32>,
    /// Push results to the bound session only, never persist
    pub transient: bool,
}

/// Engine tuning. Both limits default to "none": the gateway is an
/// operator tool and does not silently impose bounds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory for task-scoped temp files
    pub work_dir: PathBuf,
    /// Root of the flame-graph artifact hierarchy in the store
    pub flamegraph_root: String,
    /// Kill a cycle's external process after this long
    pub cycle_timeout: Option<Duration>,
    /// Refuse new tasks beyond this many concurrently running
    pub max_concurrent_tasks: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            flamegraph_root: "flameGraph".to_string(),
            cycle_timeout: None,
            max_concurrent_tasks: None,
        }
    }
}

/// Progress payload pushed to the bound session after every cycle (and
/// on start/stop/observe). Always carries the full non-transient task
/// listing so observers see the global state, not just their own task.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressPayload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    action: &'static str,
    task: &'a CaptureTask,
    tasks: &'a [CaptureTask],
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

enum Stage {
    Collect,
    Render,
}

impl Stage {
    fn classify(&self, detail: String) -> Error {
        match self {
            Stage::Collect => Error::Collection(detail),
            Stage::Render => Error::Render(detail),
        }
    }
}

/// Orchestrates capture tasks against the collaborator interfaces.
pub struct CaptureEngine {
    tasks: Arc<TaskRegistry>,
    connections: Arc<ConnectionRegistry>,
    supervisor: Arc<ProcessSupervisor>,
    collector: Arc<dyn TraceCollector>,
    renderer: Arc<dyn FlameRenderer>,
    store: Arc<dyn ArtifactStore>,
    config: EngineConfig,
    active: AtomicUsize,
}

impl CaptureEngine {
    /// Wire the engine to its registries and collaborators.
    pub fn new(
        tasks: Arc<TaskRegistry>,
        connections: Arc<ConnectionRegistry>,
        supervisor: Arc<ProcessSupervisor>,
        collector: Arc<dyn TraceCollector>,
        renderer: Arc<dyn FlameRenderer>,
        store: Arc<dyn ArtifactStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tasks,
            connections,
            supervisor,
            collector,
            renderer,
            store,
            config,
            active: AtomicUsize::new(0),
        }
    }

    /// Create a task, bind it to the requesting session, deliver the
    /// initial status snapshot, and begin cycle execution. Returns as
    /// soon as the task is registered and the snapshot has been pushed.
    pub async fn start(self: Arc<Self>, session_id: &str, spec: CaptureSpec) -> Result<CaptureTask> {
        if spec.cycles_target == Some(0) {
            return Err(Error::BadRequest(
                "cyclesTarget must be at least 1".to_string(),
            ));
        }
        if let Some(max) = self.config.max_concurrent_tasks {
            if self.active.load(Ordering::SeqCst) >= max {
                return Err(Error::BadRequest(format!(
                    "concurrent task limit reached ({})",
                    max
                )));
            }
        }

        let task = CaptureTask::new(
            spec.subject,
            spec.host_id,
            spec.script,
            spec.cycles_target,
            spec.transient,
        );
        info!(task = %task.id, pid = task.subject.pid, transient = task.transient, "starting capture task");

        if !task.transient {
            self.tasks.insert(task.clone()).await;
        }
        self.connections.bind(&task.id, session_id).await;
        self.publish_progress(&task, None).await;

        self.active.fetch_add(1, Ordering::SeqCst);
        let engine = Arc::clone(&self);
        let running = task.clone();
        tokio::spawn(async move {
            engine.run_task(running).await;
            engine.active.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(task)
    }

    /// Stop a task without waiting for any in-flight cycle. The cycle's
    /// external process is killed; its completion observes the finished
    /// status and never schedules another cycle.
    pub async fn stop(&self, task_id: &str) -> Result<()> {
        let task = self.tasks.finish(task_id).await?;
        info!(task = %task_id, cycles_done = task.cycles_done, "capture task stopped");
        self.publish_progress(&task, None).await;
        Ok(())
    }

    /// Rebind a task to a session and deliver a current snapshot.
    pub async fn observe(&self, task_id: &str, session_id: &str) -> Result<()> {
        let task = self
            .tasks
            .get(task_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("task {} not found", task_id)))?;
        self.connections.bind(task_id, session_id).await;
        self.publish_progress(&task, None).await;
        Ok(())
    }

    /// Number of tasks with a running cycle loop (transient included).
    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    async fn run_task(&self, mut task: CaptureTask) {
        loop {
            // The registry is authoritative for non-transient tasks: a
            // stop (and its eviction-on-delivery) may have landed while
            // the previous cycle ran.
            if !task.transient {
                match self.tasks.get(&task.id).await {
                    Some(current) => task = current,
                    None => return,
                }
            }
            if task.status == TaskStatus::Finished {
                return;
            }

            let cancel = CancellationToken::new();
            if !task.transient {
                self.tasks
                    .set_cycle_cancel(&task.id, Some(cancel.clone()))
                    .await;
            }
            let result = self.run_cycle(&task, &cancel).await;
            if !task.transient {
                self.tasks.set_cycle_cancel(&task.id, None).await;
            }

            match result {
                Ok(artifact) => {
                    task.cycles_done += 1;
                    if task.target_reached() {
                        task.status = TaskStatus::Finished;
                    }
                    // Transient tasks have no independent existence:
                    // losing the session ends them after this cycle.
                    if task.transient && !self.connections.is_bound(&task.id).await {
                        debug!(task = %task.id, "transient task lost its session, finishing");
                        task.status = TaskStatus::Finished;
                    }
                    if !task.transient {
                        let done = task.cycles_done;
                        let finished = task.status == TaskStatus::Finished;
                        match self
                            .tasks
                            .apply(&task.id, |t| {
                                t.cycles_done = done;
                                if finished {
                                    t.status = TaskStatus::Finished;
                                }
                            })
                            .await
                        {
                            Some(merged) => task = merged,
                            // Evicted by a stop's delivery mid-cycle.
                            None => task.status = TaskStatus::Finished,
                        }
                    }
                    self.publish_progress(&task, artifact).await;
                    if task.status == TaskStatus::Finished {
                        return;
                    }
                }
                Err(err) => {
                    warn!(task = %task.id, error = %err, "capture cycle failed");
                    task.status = TaskStatus::Finished;
                    task.last_error = Some(err.classified());
                    if !task.transient {
                        let last_error = task.last_error.clone();
                        self.tasks
                            .apply(&task.id, |t| {
                                t.status = TaskStatus::Finished;
                                t.last_error = last_error.clone();
                            })
                            .await;
                    }
                    self.publish_progress(&task, None).await;
                    return;
                }
            }
        }
    }

    /// One sample→render→publish cycle. Returns the inline artifact for
    /// transient tasks. Temp files are cleaned up exactly once on every
    /// exit path by the guard.
    async fn run_cycle(
        &self,
        task: &CaptureTask,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let raw_path = self.config.work_dir.join(format!("{}.out", task.id));
        let svg_path = self.config.work_dir.join(format!("{}.svg", task.id));
        let _cleanup = CleanupGuard::new(vec![raw_path.clone(), svg_path.clone()]);

        self.run_stage(
            self.collector.collect_spec(&task.script, &raw_path),
            cancel,
            Stage::Collect,
        )
        .await?;
        self.run_stage(
            self.renderer.render_spec(&raw_path, &svg_path),
            cancel,
            Stage::Render,
        )
        .await?;

        if task.transient {
            let svg = tokio::fs::read_to_string(&svg_path)
                .await
                .map_err(|e| Error::Storage(format!("read rendered artifact: {}", e)))?;
            return Ok(Some(svg));
        }

        let folder = format!(
            "{}/{}/{}",
            self.config.flamegraph_root, task.host_id, task.id
        );
        let leaf = format!(
            "{}/{}.svg",
            folder,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        self.store.put(&svg_path, &leaf).await?;

        if task.cycles_done == 0 {
            // Advisory metadata beside the artifacts; written once, never
            // awaited, never fails the cycle.
            let info = serde_json::json!({
                "id": task.id,
                "totalCount": task.cycles_target,
                "startDate": task.created_at,
                "execname": task.subject.execname,
                "pid": task.subject.pid,
                "probeTime": task.subject.probe_time,
                "processName": task.subject.display_name,
            });
            let store = Arc::clone(&self.store);
            let dest = format!("{}/info.json", folder);
            let task_id = task.id.clone();
            tokio::spawn(async move {
                if let Err(e) = store.put_json(&dest, &info).await {
                    warn!(task = %task_id, error = %e, "metadata upload failed");
                }
            });
        }

        Ok(None)
    }

    async fn run_stage(
        &self,
        spec: ProcessSpec,
        cancel: &CancellationToken,
        stage: Stage,
    ) -> Result<()> {
        let child = self
            .supervisor
            .spawn(&spec)
            .map_err(|e| stage.classify(e.to_string()))?;
        match self
            .supervisor
            .wait(child, cancel, self.config.cycle_timeout)
            .await
        {
            ProcessOutcome::Completed => Ok(()),
            ProcessOutcome::Failed { detail } => Err(stage.classify(detail)),
            ProcessOutcome::Cancelled => Err(Error::Cancelled),
        }
    }

    /// Push a progress update to whichever session is bound to the task.
    /// A successful delivery of a finished task's update evicts the task:
    /// its last word has been heard.
    async fn publish_progress(&self, task: &CaptureTask, artifact: Option<String>) {
        let tasks = self.tasks.list().await;
        let payload = ProgressPayload {
            kind: "capture",
            action: "progress",
            task,
            tasks: &tasks,
            artifact: artifact.as_deref(),
            error: task.last_error.as_deref(),
        };
        let json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(e) => {
                warn!(task = %task.id, error = %e, "failed to encode progress payload");
                return;
            }
        };
        let delivered = self.connections.deliver_to_task(&task.id, json).await;
        if delivered && task.status == TaskStatus::Finished {
            self.tasks.remove(&task.id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::StackvisRenderer;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Instant;
    use tokio::sync::mpsc;

    /// Collector whose every cycle runs the same shell line; records
    /// invocation timestamps so tests can prove no cycle starts after a
    /// task finished.
    struct ScriptedCollector {
        line: String,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedCollector {
        fn new(line: &str) -> Arc<Self> {
            Arc::new(Self {
                line: line.to_string(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl TraceCollector for ScriptedCollector {
        fn collect_spec(&self, _script: &str, raw_path: &std::path::Path) -> ProcessSpec {
            self.calls.lock().unwrap().push(Instant::now());
            ProcessSpec::shell(self.line.clone()).stdout_file(raw_path)
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<String>>,
        json_puts: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ArtifactStore for RecordingStore {
        async fn put(&self, _local: &Path, remote: &str) -> crate::error::Result<()> {
            self.puts.lock().unwrap().push(remote.to_string());
            Ok(())
        }

        async fn put_json(
            &self,
            remote: &str,
            _value: &serde_json::Value,
        ) -> crate::error::Result<()> {
            self.json_puts.lock().unwrap().push(remote.to_string());
            Ok(())
        }
    }

    struct Harness {
        engine: Arc<CaptureEngine>,
        tasks: Arc<TaskRegistry>,
        connections: Arc<ConnectionRegistry>,
        collector: Arc<ScriptedCollector>,
        store: Arc<RecordingStore>,
        work_dir: tempfile::TempDir,
    }

    fn build(collector_line: &str, renderer: StackvisRenderer, config: EngineConfig) -> Harness {
        let work_dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            work_dir: work_dir.path().to_path_buf(),
            ..config
        };
        let tasks = Arc::new(TaskRegistry::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let collector = ScriptedCollector::new(collector_line);
        let store = Arc::new(RecordingStore::default());
        let engine = Arc::new(CaptureEngine::new(
            Arc::clone(&tasks),
            Arc::clone(&connections),
            Arc::new(ProcessSupervisor::new()),
            collector.clone(),
            Arc::new(renderer),
            store.clone(),
            config,
        ));
        Harness {
            engine,
            tasks,
            connections,
            collector,
            store,
            work_dir,
        }
    }

    fn harness(collector_line: &str) -> Harness {
        // `cat` stands in for stackvis: raw samples pass through as-is.
        build(
            collector_line,
            StackvisRenderer::with_args("cat", vec![]),
            EngineConfig::default(),
        )
    }

    async fn connect(h: &Harness, id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        h.connections.register(id, tx).await.unwrap();
        rx
    }

    fn spec(cycles_target: Option<u32>, transient: bool) -> CaptureSpec {
        CaptureSpec {
            subject: Subject {
                pid: 4242,
                execname: "node".to_string(),
                display_name: Some("api server".to_string()),
                probe_time: Some(30),
            },
            host_id: "host-1".to_string(),
            script: "-n 'profile-97 /pid == 4242/ { @[ustack()] = count(); }'".to_string(),
            cycles_target,
            transient,
        }
    }

    async fn next_progress(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
        let msg = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for progress")
            .expect("session channel closed");
        serde_json::from_str(&msg).unwrap()
    }

    fn work_dir_file_count(h: &Harness) -> usize {
        std::fs::read_dir(h.work_dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn test_start_rejects_zero_cycle_target() {
        let h = harness("echo frames");
        let _rx = connect(&h, "s1").await;
        let result = h.engine.clone().start("s1", spec(Some(0), false)).await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
        assert!(h.tasks.is_empty().await);
    }

    #[tokio::test]
    async fn test_bounded_run_counts_cycles_and_persists_artifacts() {
        let h = harness("echo frames");
        let mut rx = connect(&h, "s1").await;
        h.engine.clone().start("s1", spec(Some(3), false)).await.unwrap();

        let initial = next_progress(&mut rx).await;
        assert_eq!(initial["type"], "capture");
        assert_eq!(initial["action"], "progress");
        assert_eq!(initial["task"]["cyclesDone"], 0);
        assert_eq!(initial["task"]["status"], "running");
        assert_eq!(initial["tasks"].as_array().unwrap().len(), 1);

        let mut counts = Vec::new();
        loop {
            let update = next_progress(&mut rx).await;
            counts.push(update["task"]["cyclesDone"].as_u64().unwrap());
            if update["task"]["status"] == "finished" {
                assert!(update.get("error").is_none());
                break;
            }
        }
        // monotonically non-decreasing, never past the target
        assert_eq!(counts, vec![1, 2, 3]);

        assert_eq!(h.collector.call_count(), 3);
        let puts = h.store.puts.lock().unwrap().clone();
        assert_eq!(puts.len(), 3);
        assert!(puts[0].starts_with("flameGraph/host-1/4242_"));
        assert!(puts[0].ends_with(".svg"));

        // metadata is fire-and-forget; give the spawned write a beat
        tokio::time::sleep(Duration::from_millis(200)).await;
        let json_puts = h.store.json_puts.lock().unwrap().clone();
        assert_eq!(json_puts.len(), 1);
        assert!(json_puts[0].ends_with("/info.json"));

        // evicted once the final update was delivered, temp files gone
        assert!(h.tasks.is_empty().await);
        assert_eq!(work_dir_file_count(&h), 0);
    }

    #[tokio::test]
    async fn test_transient_success_streams_artifact_inline() {
        let h = harness("echo '<svg>flame</svg>'");
        let mut rx = connect(&h, "s1").await;
        h.engine.clone().start("s1", spec(Some(1), true)).await.unwrap();

        let initial = next_progress(&mut rx).await;
        // transient tasks never appear in the global listing
        assert_eq!(initial["tasks"].as_array().unwrap().len(), 0);

        let update = next_progress(&mut rx).await;
        assert_eq!(update["task"]["status"], "finished");
        assert_eq!(update["artifact"], "<svg>flame</svg>\n");
        assert_eq!(update["tasks"].as_array().unwrap().len(), 0);

        assert_eq!(h.store.puts.lock().unwrap().len(), 0);
        assert_eq!(h.store.json_puts.lock().unwrap().len(), 0);
        assert!(h.tasks.is_empty().await);
    }

    #[tokio::test]
    async fn test_transient_collection_failure_reports_classified_error() {
        let h = harness("echo 'dtrace: invalid probe' >&2; exit 1");
        let mut rx = connect(&h, "s1").await;
        h.engine.clone().start("s1", spec(None, true)).await.unwrap();

        let _initial = next_progress(&mut rx).await;
        let failed = next_progress(&mut rx).await;
        assert_eq!(failed["task"]["status"], "finished");
        let error = failed["error"].as_str().unwrap();
        assert!(error.starts_with("CollectionError"), "error: {}", error);
        assert!(error.contains("invalid probe"));

        assert_eq!(h.collector.call_count(), 1);
        assert_eq!(h.store.puts.lock().unwrap().len(), 0);
        assert!(h.tasks.is_empty().await);
        assert_eq!(work_dir_file_count(&h), 0);

        // no further cycle, no further update
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(h.collector.call_count(), 1);
    }

    #[tokio::test]
    async fn test_renderer_failure_is_render_error_and_cleans_up() {
        let h = build(
            "echo frames",
            StackvisRenderer::with_args("sh", vec!["-c".into(), "exit 1".into()]),
            EngineConfig::default(),
        );
        let mut rx = connect(&h, "s1").await;
        h.engine.clone().start("s1", spec(Some(2), false)).await.unwrap();

        let _initial = next_progress(&mut rx).await;
        let failed = next_progress(&mut rx).await;
        assert_eq!(failed["task"]["status"], "finished");
        assert!(failed["error"]
            .as_str()
            .unwrap()
            .starts_with("RenderError"));

        assert_eq!(h.collector.call_count(), 1);
        assert_eq!(h.store.puts.lock().unwrap().len(), 0);
        assert_eq!(work_dir_file_count(&h), 0);
    }

    #[tokio::test]
    async fn test_stop_idle_task_finishes_without_touching_counts() {
        let h = harness("echo unused");
        let mut rx = connect(&h, "s1").await;

        let task = CaptureTask::new(
            spec(Some(5), false).subject,
            "host-1".to_string(),
            "script".to_string(),
            Some(5),
            false,
        );
        h.tasks.insert(task.clone()).await;
        h.connections.bind(&task.id, "s1").await;

        h.engine.stop(&task.id).await.unwrap();

        let update = next_progress(&mut rx).await;
        assert_eq!(update["task"]["status"], "finished");
        assert_eq!(update["task"]["cyclesDone"], 0);
        assert!(h.tasks.is_empty().await);
        assert_eq!(h.collector.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_unknown_task_is_not_found() {
        let h = harness("echo unused");
        assert!(matches!(
            h.engine.stop("77_never").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_observe_unknown_task_has_no_side_effects() {
        let h = harness("echo unused");
        let _rx = connect(&h, "s1").await;
        assert!(matches!(
            h.engine.observe("77_never", "s1").await,
            Err(Error::NotFound(_))
        ));
        assert!(h.tasks.is_empty().await);
        assert!(!h.connections.is_bound("77_never").await);
    }

    #[tokio::test]
    async fn test_stop_mid_cycle_kills_collector_and_reports_cancelled() {
        let h = harness("sleep 30");
        let mut rx = connect(&h, "s1").await;
        let task = h.engine.clone().start("s1", spec(None, false)).await.unwrap();
        let _initial = next_progress(&mut rx).await;

        // let the cycle get its collector spawned
        tokio::time::sleep(Duration::from_millis(200)).await;
        let stopped_at = Instant::now();
        h.engine.stop(&task.id).await.unwrap();

        // two updates follow in either order: the stop snapshot and the
        // cancelled cycle's final word
        let first = next_progress(&mut rx).await;
        let second = next_progress(&mut rx).await;
        assert_eq!(first["task"]["status"], "finished");
        assert_eq!(second["task"]["status"], "finished");
        let errors: Vec<_> = [&first, &second]
            .iter()
            .filter_map(|u| u["error"].as_str().map(str::to_string))
            .collect();
        assert_eq!(errors, vec!["Cancelled".to_string()]);

        // the 30s collector did not run to completion
        assert!(stopped_at.elapsed() < Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.collector.call_count(), 1);
        assert!(h.tasks.is_empty().await);
        assert_eq!(work_dir_file_count(&h), 0);
    }

    #[tokio::test]
    async fn test_cycle_timeout_classifies_as_stage_failure() {
        let h = build(
            "sleep 30",
            StackvisRenderer::with_args("cat", vec![]),
            EngineConfig {
                cycle_timeout: Some(Duration::from_millis(200)),
                ..EngineConfig::default()
            },
        );
        let mut rx = connect(&h, "s1").await;
        h.engine.clone().start("s1", spec(Some(1), false)).await.unwrap();

        let _initial = next_progress(&mut rx).await;
        let failed = next_progress(&mut rx).await;
        let error = failed["error"].as_str().unwrap();
        assert!(error.starts_with("CollectionError"), "error: {}", error);
        assert!(error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_concurrent_task_limit() {
        let h = build(
            "sleep 30",
            StackvisRenderer::with_args("cat", vec![]),
            EngineConfig {
                max_concurrent_tasks: Some(1),
                ..EngineConfig::default()
            },
        );
        let mut rx = connect(&h, "s1").await;
        let task = h.engine.clone().start("s1", spec(None, false)).await.unwrap();
        let _initial = next_progress(&mut rx).await;

        let refused = h.engine.clone().start("s1", spec(None, false)).await;
        assert!(matches!(refused, Err(Error::BadRequest(_))));

        h.engine.stop(&task.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_observe_rebinds_delivery_to_new_session_only() {
        let h = harness("sleep 0.3");
        let mut rx_a = connect(&h, "a").await;
        let task = h.engine.clone().start("a", spec(Some(3), false)).await.unwrap();

        let _initial = next_progress(&mut rx_a).await;
        let first = next_progress(&mut rx_a).await;
        assert_eq!(first["task"]["cyclesDone"], 1);

        let mut rx_b = connect(&h, "b").await;
        h.engine.observe(&task.id, "b").await.unwrap();
        let snapshot = next_progress(&mut rx_b).await;
        assert!(snapshot["task"]["cyclesDone"].as_u64().unwrap() >= 1);

        // the next cycle's update reaches b, and only b
        let update = next_progress(&mut rx_b).await;
        assert!(update["task"]["cyclesDone"].as_u64().unwrap() >= 2);
        assert!(rx_a.try_recv().is_err());

        h.engine.stop(&task.id).await.ok();
    }

    #[tokio::test]
    async fn test_transient_task_finishes_after_losing_its_session() {
        let h = harness("sleep 0.5");
        let mut rx = connect(&h, "s1").await;
        h.engine.clone().start("s1", spec(None, true)).await.unwrap();
        let _initial = next_progress(&mut rx).await;

        // session drops mid-cycle; the cycle finishes, nothing reschedules
        drop(rx);
        h.connections.unregister("s1").await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(h.collector.call_count(), 1);
        assert_eq!(h.engine.active_tasks(), 0);
        assert!(h.tasks.is_empty().await);
        assert_eq!(work_dir_file_count(&h), 0);
    }

    #[tokio::test]
    async fn test_headless_task_keeps_running_after_disconnect() {
        let h = harness("sleep 0.2");
        let mut rx = connect(&h, "s1").await;
        h.engine.clone().start("s1", spec(Some(3), false)).await.unwrap();
        let _initial = next_progress(&mut rx).await;

        // disconnect during the first cycle
        drop(rx);
        h.connections.unregister("s1").await;

        // non-transient tasks survive the disconnect and run to target
        let deadline = Instant::now() + Duration::from_secs(10);
        while h.engine.active_tasks() > 0 {
            assert!(Instant::now() < deadline, "task never finished");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(h.collector.call_count(), 3);

        // finished but undelivered: still listed until someone observes
        let remaining = h.tasks.list().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].status, TaskStatus::Finished);

        // a late observer gets the final snapshot, which evicts the task
        let mut rx2 = connect(&h, "s2").await;
        h.engine.observe(&remaining[0].id, "s2").await.unwrap();
        let snapshot = next_progress(&mut rx2).await;
        assert_eq!(snapshot["task"]["status"], "finished");
        assert_eq!(snapshot["task"]["cyclesDone"], 3);
        assert!(h.tasks.is_empty().await);
    }
}
