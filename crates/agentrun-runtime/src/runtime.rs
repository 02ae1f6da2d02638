//! Per-agent runtime controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use agentrun_core::{MetricsSnapshot, RuntimeStatus, TaskId, TaskSnapshot};

use crate::registry::QueuedTask;
use crate::{worker, Metrics, RuntimeConfig, RuntimeError, TaskHandler, TaskRegistry};

/// How long aborted workers get to unwind before `stop` returns.
const ABORT_SETTLE: Duration = Duration::from_millis(100);

/// State shared between the controller and its workers.
pub(crate) struct Shared {
    pub(crate) agent_id: String,
    pub(crate) config: RuntimeConfig,
    pub(crate) handler: Arc<dyn TaskHandler>,
    pub(crate) registry: TaskRegistry,
    pub(crate) metrics: Metrics,
    /// Cleared by `stop`; workers check it between polls.
    pub(crate) accepting: AtomicBool,
    pub(crate) queue_rx: Mutex<mpsc::UnboundedReceiver<QueuedTask>>,
    queue_tx: mpsc::UnboundedSender<QueuedTask>,
}

impl Shared {
    pub(crate) fn enqueue(&self, entry: QueuedTask) {
        // The receiver lives in the same struct, so the channel cannot close.
        if self.queue_tx.send(entry).is_err() {
            error!(agent_id = %self.agent_id, "Task queue closed, dropping entry");
        }
    }
}

/// Outcome of `stop`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Workers that were running when `stop` was called.
    pub workers: usize,
    /// Workers still busy after the grace period, aborted.
    pub forced_workers: usize,
    /// Tasks left in `Processing`; their outcome is unknown.
    pub abandoned_tasks: usize,
}

impl ShutdownReport {
    /// True when every worker exited on its own.
    pub fn is_clean(&self) -> bool {
        self.forced_workers == 0
    }
}

/// How a set of worker handles ended.
#[derive(Debug, Default, PartialEq, Eq)]
struct JoinSummary {
    forced: usize,
    panicked: usize,
}

/// Join workers, aborting the ones still running after `grace`.
///
/// Each handle is polled to completion at most once; panics are counted
/// whether they were observed during the grace period or afterwards.
async fn join_workers(mut pending: Vec<JoinHandle<()>>, grace: Duration) -> JoinSummary {
    let mut summary = JoinSummary::default();

    let drained = tokio::time::timeout(grace, async {
        while let Some(handle) = pending.last_mut() {
            let result = handle.await;
            pending.pop();
            if matches!(result, Err(ref e) if e.is_panic()) {
                summary.panicked += 1;
            }
        }
    })
    .await;

    if drained.is_err() {
        for handle in &pending {
            if !handle.is_finished() {
                handle.abort();
                summary.forced += 1;
            }
        }
    }

    for handle in pending {
        if let Ok(Err(e)) = tokio::time::timeout(ABORT_SETTLE, handle).await {
            if e.is_panic() {
                summary.panicked += 1;
            }
        }
    }

    summary
}

/// What `get_status` reports for a runtime.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeReport {
    pub agent_id: String,
    pub runtime_status: RuntimeStatus,
    pub capabilities: Vec<String>,
    pub config: RuntimeConfig,
    pub metrics: MetricsSnapshot,
}

/// Task-execution runtime for one agent.
///
/// Tasks are queued in submission order and executed by `max_workers`
/// concurrent workers, each running one task at a time. There is no limit
/// on queue depth and no timeout on handlers unless `task_timeout_ms` is set.
pub struct AgentRuntime {
    shared: Arc<Shared>,
    status: RwLock<RuntimeStatus>,
    /// Worker handles; the lock also serializes `start` and `stop`.
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AgentRuntime {
    /// Create a stopped runtime.
    pub fn new(
        agent_id: impl Into<String>,
        config: RuntimeConfig,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                agent_id: agent_id.into(),
                config,
                handler,
                registry: TaskRegistry::new(),
                metrics: Metrics::new(),
                accepting: AtomicBool::new(false),
                queue_rx: Mutex::new(queue_rx),
                queue_tx,
            }),
            status: RwLock::new(RuntimeStatus::Stopped),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.shared.agent_id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Initialize the handler and spawn the worker pool.
    ///
    /// On failure the runtime is left in `Error` with no workers; calling
    /// `start` again retries.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        let mut workers = self.workers.lock().await;
        {
            let mut status = self.status.write().await;
            if !status.can_start() {
                return Err(RuntimeError::InvalidTransition {
                    from: *status,
                    to: RuntimeStatus::Starting,
                });
            }
            *status = RuntimeStatus::Starting;
        }

        let agent_id = &self.shared.agent_id;
        info!(agent_id = %agent_id, "Starting agent");

        if let Err(e) = self.shared.config.validate() {
            error!(agent_id = %agent_id, error = %e, "Refusing to start agent");
            self.set_status(RuntimeStatus::Error).await;
            return Err(e);
        }

        if let Err(e) = self.shared.handler.initialize().await {
            error!(agent_id = %agent_id, error = %e, "Agent initialization failed");
            self.set_status(RuntimeStatus::Error).await;
            return Err(RuntimeError::InitFailed {
                agent_id: agent_id.clone(),
                reason: e.to_string(),
            });
        }

        self.shared.accepting.store(true, Ordering::SeqCst);
        let worker_count = self.shared.config.max_workers;
        for i in 0..worker_count {
            let shared = self.shared.clone();
            workers.push(tokio::spawn(worker::run_worker(shared, format!("worker-{i}"))));
        }

        self.set_status(RuntimeStatus::Running).await;
        info!(agent_id = %agent_id, workers = worker_count, "Agent started");
        Ok(())
    }

    /// Stop the worker pool.
    ///
    /// Waits up to the grace period for workers to notice shutdown, then
    /// aborts whichever are still busy. Never blocks longer than the grace
    /// period plus a short settle time.
    pub async fn stop(&self) -> Result<ShutdownReport, RuntimeError> {
        let mut workers = self.workers.lock().await;
        {
            let mut status = self.status.write().await;
            match *status {
                RuntimeStatus::Stopped | RuntimeStatus::Error => {
                    return Ok(ShutdownReport::default());
                }
                RuntimeStatus::Running => *status = RuntimeStatus::Stopping,
                other => {
                    return Err(RuntimeError::InvalidTransition {
                        from: other,
                        to: RuntimeStatus::Stopping,
                    });
                }
            }
        }

        let agent_id = &self.shared.agent_id;
        let grace = self.shared.config.grace_period();
        info!(agent_id = %agent_id, grace_ms = grace.as_millis() as u64, "Stopping agent");

        self.shared.accepting.store(false, Ordering::SeqCst);

        let handles: Vec<JoinHandle<()>> = workers.drain(..).collect();
        let worker_count = handles.len();
        let joined = join_workers(handles, grace).await;
        if joined.forced > 0 {
            warn!(
                agent_id = %agent_id,
                forced_workers = joined.forced,
                "Workers did not stop within grace period, aborted"
            );
        }

        for entry in self.shared.registry.release_abandoned().await {
            self.shared.enqueue(entry);
        }
        let abandoned = self.shared.registry.counts().await.processing;
        if abandoned > 0 {
            warn!(
                agent_id = %agent_id,
                abandoned_tasks = abandoned,
                "Tasks left in processing, outcome unknown"
            );
        }

        let report = ShutdownReport {
            workers: worker_count,
            forced_workers: joined.forced,
            abandoned_tasks: abandoned,
        };

        let panicked = joined.panicked;
        if panicked > 0 {
            error!(agent_id = %agent_id, panicked, "Worker panicked during shutdown");
            self.set_status(RuntimeStatus::Error).await;
            return Err(RuntimeError::WorkerPanicked {
                agent_id: agent_id.clone(),
                count: panicked,
            });
        }

        self.set_status(RuntimeStatus::Stopped).await;
        info!(agent_id = %agent_id, clean = report.is_clean(), "Agent stopped");
        Ok(report)
    }

    /// Queue a task. Only accepted while the runtime is `Running`.
    ///
    /// Resubmitting an id replaces the earlier record.
    pub async fn submit_task(
        &self,
        task_id: impl Into<TaskId>,
        payload: Value,
    ) -> Result<(), RuntimeError> {
        let task_id = task_id.into();
        let status = self.status.read().await;
        let current = *status;
        if !current.accepts_tasks() {
            warn!(
                agent_id = %self.shared.agent_id,
                task_id = %task_id,
                status = %current,
                "Rejecting task submission"
            );
            return Err(RuntimeError::NotAccepting {
                agent_id: self.shared.agent_id.clone(),
                status: current,
            });
        }

        let entry = self.shared.registry.insert(task_id, payload).await;
        info!(agent_id = %self.shared.agent_id, task_id = %entry.id, "Task submitted");
        self.shared.enqueue(entry);
        drop(status);
        Ok(())
    }

    pub async fn get_task_status(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        self.shared.registry.get(task_id).await
    }

    /// Snapshots of every task ever submitted, in submission order.
    pub async fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.shared.registry.list().await
    }

    pub async fn get_metrics(&self) -> MetricsSnapshot {
        self.shared
            .registry
            .metrics_snapshot(&self.shared.metrics)
            .await
    }

    pub async fn status(&self) -> RuntimeStatus {
        *self.status.read().await
    }

    pub fn capabilities(&self) -> Vec<String> {
        self.shared.handler.capabilities()
    }

    pub async fn get_status(&self) -> RuntimeReport {
        RuntimeReport {
            agent_id: self.shared.agent_id.clone(),
            runtime_status: self.status().await,
            capabilities: self.capabilities(),
            config: self.shared.config.clone(),
            metrics: self.get_metrics().await,
        }
    }

    async fn set_status(&self, status: RuntimeStatus) {
        *self.status.write().await = status;
    }
}
