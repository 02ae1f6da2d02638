//! Task records and their read projection.

use crate::{CoreError, FailureKind, TaskFailure, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bookkeeping entry for one unit of work submitted to an agent runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Caller-supplied task identifier.
    pub id: TaskId,

    /// Submission this record belongs to. A resubmitted id gets a new one.
    pub generation: u64,

    /// Opaque input handed to the task handler.
    pub payload: Value,

    /// Current task status.
    pub status: TaskStatus,

    /// When the task was submitted.
    pub created_at: DateTime<Utc>,

    /// When a worker picked the task up.
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,

    /// Handler result on success.
    pub result: Option<Value>,

    /// Error message on failure.
    pub error: Option<String>,

    /// Failure classification on failure.
    pub failure_kind: Option<FailureKind>,
}

impl TaskRecord {
    /// Create a new pending record.
    pub fn new(id: TaskId, generation: u64, payload: Value) -> Self {
        Self {
            id,
            generation,
            payload,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            failure_kind: None,
        }
    }

    /// Mark the task as picked up by a worker.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.transition(TaskStatus::Processing)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as completed with the handler's result.
    pub fn complete(&mut self, result: Value) -> Result<(), CoreError> {
        self.transition(TaskStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
        Ok(())
    }

    /// Mark the task as failed.
    pub fn fail(&mut self, failure: TaskFailure) -> Result<(), CoreError> {
        self.transition(TaskStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.error = Some(failure.message);
        self.failure_kind = Some(failure.kind);
        Ok(())
    }

    /// Read projection without the payload.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error: self.error.clone(),
            failure_kind: self.failure_kind,
        }
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), CoreError> {
        let allowed = match to {
            TaskStatus::Processing => self.status == TaskStatus::Pending,
            TaskStatus::Completed | TaskStatus::Failed => self.status == TaskStatus::Processing,
            TaskStatus::Pending | TaskStatus::Cancelled => false,
        };
        if !allowed {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }
}

/// What `get_task_status` reports for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> TaskRecord {
        TaskRecord::new(TaskId::new("t-1"), 1, json!({"path": "src/lib.rs"}))
    }

    #[test]
    fn test_happy_path() {
        let mut task = record();
        assert_eq!(task.status, TaskStatus::Pending);

        task.start().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert!(task.started_at.is_some());

        task.complete(json!({"issues": 0})).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!({"issues": 0})));
        assert!(task.completed_at.is_some());
        assert!(task.error.is_none());
    }

    #[test]
    fn test_fail_records_kind_and_message() {
        let mut task = record();
        task.start().unwrap();
        task.fail(TaskFailure::handler_error("boom")).unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("boom"));
        assert_eq!(task.failure_kind, Some(FailureKind::HandlerError));
        assert!(task.result.is_none());
    }

    #[test]
    fn test_terminal_is_final() {
        let mut task = record();
        task.start().unwrap();
        task.complete(json!(1)).unwrap();

        let err = task.fail(TaskFailure::handler_error("late")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.start().is_err());
    }

    #[test]
    fn test_cannot_complete_unstarted_task() {
        let mut task = record();
        assert!(task.complete(json!(null)).is_err());
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_snapshot_omits_payload() {
        let task = record();
        let value = serde_json::to_value(task.snapshot()).unwrap();
        assert_eq!(value["task_id"], "t-1");
        assert_eq!(value["status"], "pending");
        assert!(value.get("payload").is_none());
        assert!(value.get("started_at").is_none());
    }
}
