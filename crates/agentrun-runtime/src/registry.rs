//! In-memory task registry.
//!
//! The registry is the single source of truth for task status. Records are
//! never evicted, so memory grows with the number of submissions over the
//! runtime's lifetime.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use agentrun_core::{
    CoreError, MetricsSnapshot, TaskFailure, TaskId, TaskRecord, TaskSnapshot, TaskStatus,
};

use crate::Metrics;

/// A queue entry: which submission of which task to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTask {
    pub id: TaskId,
    pub generation: u64,
}

/// Result of a worker trying to take ownership of a queued task.
#[derive(Debug, PartialEq)]
pub enum Claim {
    /// The worker owns the task and must run it with this payload.
    Claimed(Value),
    /// Another worker is still running this id; the entry is dropped and the
    /// current owner re-enqueues the newest submission when it finishes.
    Deferred,
    /// The entry no longer matches a pending record.
    Stale,
}

/// How a handler invocation ended.
#[derive(Debug)]
pub enum Outcome {
    Completed { result: Value, elapsed: Duration },
    Failed(TaskFailure),
}

/// What `finish` did with an outcome.
#[derive(Debug)]
pub struct Finished {
    /// False when the record was replaced by a newer submission while the
    /// handler ran; the outcome was discarded and not counted.
    pub recorded: bool,
    /// A deferred submission the caller must put back on the queue.
    pub requeue: Option<QueuedTask>,
}

/// Task counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Default)]
struct RegistryState {
    records: HashMap<TaskId, TaskRecord>,
    in_flight: HashSet<TaskId>,
    deferred: HashSet<TaskId>,
    next_generation: u64,
}

/// Task records of one agent runtime, indexed by id.
#[derive(Default)]
pub struct TaskRegistry {
    state: RwLock<RegistryState>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending record, replacing any record with the same id.
    pub async fn insert(&self, id: TaskId, payload: Value) -> QueuedTask {
        let mut state = self.state.write().await;
        state.next_generation += 1;
        let generation = state.next_generation;

        // The new submission carries its own queue entry.
        state.deferred.remove(&id);
        state
            .records
            .insert(id.clone(), TaskRecord::new(id.clone(), generation, payload));

        QueuedTask { id, generation }
    }

    /// Take ownership of a queued task and mark it `Processing`.
    pub async fn claim(&self, entry: &QueuedTask) -> Result<Claim, CoreError> {
        let mut state = self.state.write().await;
        let RegistryState {
            records,
            in_flight,
            deferred,
            ..
        } = &mut *state;

        let Some(record) = records.get_mut(&entry.id) else {
            return Ok(Claim::Stale);
        };
        if record.generation != entry.generation || record.status != TaskStatus::Pending {
            return Ok(Claim::Stale);
        }
        if in_flight.contains(&entry.id) {
            deferred.insert(entry.id.clone());
            return Ok(Claim::Deferred);
        }

        record.start()?;
        in_flight.insert(entry.id.clone());
        Ok(Claim::Claimed(record.payload.clone()))
    }

    /// Store a handler outcome and update the metrics in the same critical
    /// section, so counters always agree with terminal records.
    pub async fn finish(
        &self,
        entry: &QueuedTask,
        outcome: Outcome,
        metrics: &Metrics,
    ) -> Result<Finished, CoreError> {
        let mut state = self.state.write().await;
        let RegistryState {
            records,
            in_flight,
            deferred,
            ..
        } = &mut *state;

        in_flight.remove(&entry.id);
        let record = records
            .get_mut(&entry.id)
            .ok_or_else(|| CoreError::TaskNotFound(entry.id.to_string()))?;

        let requeue = if deferred.remove(&entry.id) && record.status == TaskStatus::Pending {
            Some(QueuedTask {
                id: entry.id.clone(),
                generation: record.generation,
            })
        } else {
            None
        };

        if record.generation != entry.generation {
            return Ok(Finished {
                recorded: false,
                requeue,
            });
        }

        match outcome {
            Outcome::Completed { result, elapsed } => {
                record.complete(result)?;
                metrics.record_completed(elapsed, record.completed_at.unwrap_or_else(Utc::now));
            }
            Outcome::Failed(failure) => {
                record.fail(failure)?;
                metrics.record_failed(record.completed_at.unwrap_or_else(Utc::now));
            }
        }

        Ok(Finished {
            recorded: true,
            requeue,
        })
    }

    /// Forget ownership held by workers that were aborted during shutdown.
    ///
    /// Their records stay `Processing`; nothing will ever finish them.
    /// Returns deferred submissions that must go back on the queue.
    pub async fn release_abandoned(&self) -> Vec<QueuedTask> {
        let mut state = self.state.write().await;
        let RegistryState {
            records,
            in_flight,
            deferred,
            ..
        } = &mut *state;

        in_flight.clear();
        deferred
            .drain()
            .filter_map(|id| {
                records
                    .get(&id)
                    .filter(|record| record.status == TaskStatus::Pending)
                    .map(|record| QueuedTask {
                        id: id.clone(),
                        generation: record.generation,
                    })
            })
            .collect()
    }

    /// Read projection of one task.
    pub async fn get(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.state.read().await.records.get(id).map(TaskRecord::snapshot)
    }

    /// Full record of one task, payload included.
    pub async fn record(&self, id: &TaskId) -> Option<TaskRecord> {
        self.state.read().await.records.get(id).cloned()
    }

    /// Snapshots of every task, oldest submission first.
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        let state = self.state.read().await;
        let mut records: Vec<&TaskRecord> = state.records.values().collect();
        records.sort_by_key(|r| r.generation);
        records.into_iter().map(TaskRecord::snapshot).collect()
    }

    pub async fn counts(&self) -> TaskCounts {
        let state = self.state.read().await;
        count(&state.records)
    }

    /// Task counts and a metrics snapshot read in one critical section.
    pub async fn observe(&self, metrics: &Metrics) -> (TaskCounts, MetricsSnapshot) {
        let state = self.state.read().await;
        let counts = count(&state.records);
        (counts, metrics.snapshot(counts.processing, counts.pending))
    }

    /// Metrics snapshot taken under the registry lock.
    pub async fn metrics_snapshot(&self, metrics: &Metrics) -> MetricsSnapshot {
        self.observe(metrics).await.1
    }
}

fn count(records: &HashMap<TaskId, TaskRecord>) -> TaskCounts {
    records
        .values()
        .fold(TaskCounts::default(), |mut counts, record| {
            match record.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => {}
            }
            counts
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentrun_core::FailureKind;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Instant;
    use tokio::task::JoinSet;

    fn done(value: Value) -> Outcome {
        Outcome::Completed {
            result: value,
            elapsed: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_claim_and_complete() {
        let registry = TaskRegistry::new();
        let metrics = Metrics::new();
        let entry = registry.insert(TaskId::new("a"), json!({"n": 1})).await;

        assert_eq!(registry.counts().await.pending, 1);
        let claim = registry.claim(&entry).await.unwrap();
        assert_eq!(claim, Claim::Claimed(json!({"n": 1})));
        assert_eq!(registry.counts().await.processing, 1);

        let finished = registry.finish(&entry, done(json!("ok")), &metrics).await.unwrap();
        assert!(finished.recorded);
        assert!(finished.requeue.is_none());

        let snapshot = registry.get(&entry.id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result, Some(json!("ok")));
        assert_eq!(metrics.completed(), 1);
        let counts = registry.counts().await;
        assert_eq!((counts.pending, counts.processing, counts.completed), (0, 0, 1));
    }

    #[tokio::test]
    async fn test_failure_is_counted() {
        let registry = TaskRegistry::new();
        let metrics = Metrics::new();
        let entry = registry.insert(TaskId::new("a"), json!(null)).await;
        registry.claim(&entry).await.unwrap();

        registry
            .finish(
                &entry,
                Outcome::Failed(TaskFailure::handler_error("boom")),
                &metrics,
            )
            .await
            .unwrap();

        let snapshot = registry.get(&entry.id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("boom"));
        assert_eq!(snapshot.failure_kind, Some(FailureKind::HandlerError));
        assert_eq!(metrics.failed(), 1);
        assert_eq!(metrics.completed(), 0);
    }

    #[tokio::test]
    async fn test_entry_can_only_be_claimed_once() {
        let registry = TaskRegistry::new();
        let entry = registry.insert(TaskId::new("a"), json!(1)).await;

        assert!(matches!(registry.claim(&entry).await.unwrap(), Claim::Claimed(_)));
        assert_eq!(registry.claim(&entry).await.unwrap(), Claim::Stale);
    }

    #[tokio::test]
    async fn test_resubmission_overwrites_pending_record() {
        let registry = TaskRegistry::new();
        let first = registry.insert(TaskId::new("a"), json!("first")).await;
        let second = registry.insert(TaskId::new("a"), json!("second")).await;

        assert_eq!(registry.list().await.len(), 1);
        assert_ne!(first.generation, second.generation);
        assert_eq!(
            registry.record(&second.id).await.unwrap().payload,
            json!("second")
        );

        assert_eq!(registry.claim(&first).await.unwrap(), Claim::Stale);
        assert_eq!(
            registry.claim(&second).await.unwrap(),
            Claim::Claimed(json!("second"))
        );
    }

    #[tokio::test]
    async fn test_resubmission_while_in_flight_is_deferred() {
        let registry = TaskRegistry::new();
        let metrics = Metrics::new();
        let first = registry.insert(TaskId::new("a"), json!(1)).await;
        registry.claim(&first).await.unwrap();

        let second = registry.insert(TaskId::new("a"), json!(2)).await;
        assert_eq!(registry.claim(&second).await.unwrap(), Claim::Deferred);

        // The superseded run finishes: its outcome is dropped and the newer
        // submission is handed back for re-queueing.
        let finished = registry.finish(&first, done(json!(1)), &metrics).await.unwrap();
        assert!(!finished.recorded);
        assert_eq!(finished.requeue, Some(second.clone()));
        assert_eq!(metrics.completed(), 0);
        assert_eq!(
            registry.get(&second.id).await.unwrap().status,
            TaskStatus::Pending
        );

        assert_eq!(registry.claim(&second).await.unwrap(), Claim::Claimed(json!(2)));
    }

    #[tokio::test]
    async fn test_release_abandoned_returns_deferred_submissions() {
        let registry = TaskRegistry::new();
        let first = registry.insert(TaskId::new("a"), json!(1)).await;
        registry.claim(&first).await.unwrap();
        let second = registry.insert(TaskId::new("a"), json!(2)).await;
        assert_eq!(registry.claim(&second).await.unwrap(), Claim::Deferred);

        let requeue = registry.release_abandoned().await;
        assert_eq!(requeue, vec![second.clone()]);

        // With ownership released the newer submission can be claimed.
        assert_eq!(registry.claim(&second).await.unwrap(), Claim::Claimed(json!(2)));
    }

    #[tokio::test]
    async fn test_list_is_in_submission_order() {
        let registry = TaskRegistry::new();
        for id in ["c", "a", "b"] {
            registry.insert(TaskId::new(id), json!(null)).await;
        }
        let ids: Vec<_> = registry
            .list()
            .await
            .into_iter()
            .map(|s| s.task_id.into_inner())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_counters_equal_terminal_records_while_running() {
        let registry = Arc::new(TaskRegistry::new());
        let metrics = Arc::new(Metrics::new());
        let total = 64;

        let mut tasks = JoinSet::new();
        for i in 0..total {
            let registry = registry.clone();
            let metrics = metrics.clone();
            tasks.spawn(async move {
                let entry = registry.insert(TaskId::new(format!("t{i}")), json!(i)).await;
                registry.claim(&entry).await.unwrap();
                tokio::task::yield_now().await;
                let outcome = if i % 3 == 0 {
                    Outcome::Failed(TaskFailure::handler_error("boom"))
                } else {
                    done(json!(i))
                };
                registry.finish(&entry, outcome, &metrics).await.unwrap();
            });
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let (counts, snapshot) = registry.observe(&metrics).await;
            assert_eq!(snapshot.completed, counts.completed as u64);
            assert_eq!(snapshot.failed, counts.failed as u64);
            assert_eq!(snapshot.active_count, counts.processing);
            assert_eq!(snapshot.pending_count, counts.pending);
            if counts.completed + counts.failed == total {
                break;
            }
            assert!(Instant::now() < deadline, "tasks never finished");
            tokio::task::yield_now().await;
        }

        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }
        assert_eq!(metrics.failed(), 22);
        assert_eq!(metrics.completed(), 42);
    }
}
