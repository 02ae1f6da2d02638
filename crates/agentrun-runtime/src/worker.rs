//! Worker loop and task-processing routine.

use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use agentrun_core::{CoreError, TaskFailure, TaskId};

use crate::registry::{Claim, Outcome, QueuedTask};
use crate::runtime::Shared;

/// Drain the shared queue until the runtime stops accepting work.
///
/// Shutdown is only observed between polls, so an idle worker exits at most
/// one poll interval after `stop` is requested.
pub(crate) async fn run_worker(shared: Arc<Shared>, name: String) {
    info!(agent_id = %shared.agent_id, worker = %name, "Worker started");
    let poll_interval = shared.config.poll_interval();

    while shared.accepting.load(Ordering::SeqCst) {
        let next = tokio::time::timeout(poll_interval, async {
            shared.queue_rx.lock().await.recv().await
        })
        .await;

        let entry = match next {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!(agent_id = %shared.agent_id, worker = %name, "Task queue closed");
                break;
            }
            Err(_) => continue,
        };

        if let Err(e) = process_entry(&shared, &name, entry).await {
            error!(
                agent_id = %shared.agent_id,
                worker = %name,
                error = %e,
                "Worker error"
            );
        }
    }

    info!(agent_id = %shared.agent_id, worker = %name, "Worker stopped");
}

/// Run one queued task to a terminal state.
async fn process_entry(shared: &Shared, worker: &str, entry: QueuedTask) -> Result<(), CoreError> {
    let payload = match shared.registry.claim(&entry).await? {
        Claim::Claimed(payload) => payload,
        Claim::Deferred => {
            debug!(task_id = %entry.id, worker = %worker, "Task id still in flight, deferring");
            return Ok(());
        }
        Claim::Stale => {
            debug!(task_id = %entry.id, worker = %worker, "Skipping stale queue entry");
            return Ok(());
        }
    };

    info!(agent_id = %shared.agent_id, task_id = %entry.id, worker = %worker, "Processing task");

    let started = Instant::now();
    let outcome = match execute(shared, &entry.id, payload).await {
        Ok(result) => {
            let elapsed = started.elapsed();
            info!(
                agent_id = %shared.agent_id,
                task_id = %entry.id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Task completed"
            );
            Outcome::Completed { result, elapsed }
        }
        Err(failure) => {
            error!(
                agent_id = %shared.agent_id,
                task_id = %entry.id,
                kind = %failure.kind,
                error = %failure.message,
                "Task failed"
            );
            Outcome::Failed(failure)
        }
    };

    let finished = shared
        .registry
        .finish(&entry, outcome, &shared.metrics)
        .await?;

    if !finished.recorded {
        warn!(
            task_id = %entry.id,
            generation = entry.generation,
            "Task was resubmitted while running, discarding outcome"
        );
    }
    if let Some(next) = finished.requeue {
        debug!(task_id = %next.id, "Re-queueing deferred submission");
        shared.enqueue(next);
    }

    Ok(())
}

/// Aborts the handler's task when the owning worker is dropped or aborted.
struct HandlerCall(JoinHandle<Result<Value, String>>);

impl Drop for HandlerCall {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Invoke the handler in a child task so panics are contained.
async fn execute(shared: &Shared, task_id: &TaskId, payload: Value) -> Result<Value, TaskFailure> {
    let handler = shared.handler.clone();
    let id = task_id.clone();
    let mut call = HandlerCall(tokio::spawn(async move {
        handler
            .process_task(&id, payload)
            .await
            .map_err(|e| e.to_string())
    }));

    let joined = match shared.config.task_timeout() {
        Some(deadline) => match tokio::time::timeout(deadline, &mut call.0).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(TaskFailure::deadline_exceeded(format!(
                    "handler did not finish within {}ms",
                    deadline.as_millis()
                )));
            }
        },
        None => (&mut call.0).await,
    };

    match joined {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(message)) => Err(TaskFailure::handler_error(message)),
        Err(e) if e.is_panic() => Err(TaskFailure::handler_panic(panic_message(e.into_panic()))),
        Err(e) => Err(TaskFailure::handler_error(e.to_string())),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
