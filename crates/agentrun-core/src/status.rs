//! Status enums for agent runtimes and their tasks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an agent runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    /// No workers running; `start` may be called.
    #[default]
    Stopped,
    /// Handler initialization in progress.
    Starting,
    /// Workers are draining the queue and submissions are accepted.
    Running,
    /// Shutdown in progress.
    Stopping,
    /// Initialization or teardown failed. Stays here until the next `start`.
    Error,
}

impl RuntimeStatus {
    /// Returns true if `start` may be called from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Returns true if new tasks are accepted in this state.
    pub fn accepts_tasks(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task submitted and waiting in the queue.
    #[default]
    Pending,
    /// A worker is executing the task's handler.
    Processing,
    /// Handler returned a result.
    Completed,
    /// Handler returned an error, panicked or overran its deadline.
    Failed,
    /// Reserved for cooperative cancellation. Never assigned by the runtime.
    Cancelled,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
