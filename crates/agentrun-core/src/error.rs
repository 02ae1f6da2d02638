//! Core domain errors and task failure descriptions.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Core domain errors for AgentRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}

/// Why a task ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The handler returned an error.
    HandlerError,
    /// The handler panicked.
    HandlerPanic,
    /// The handler ran past the configured per-task deadline.
    DeadlineExceeded,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HandlerError => "handler_error",
            Self::HandlerPanic => "handler_panic",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure captured from a task execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn handler_error(message: impl Into<String>) -> Self {
        Self::new(FailureKind::HandlerError, message)
    }

    pub fn handler_panic(message: impl Into<String>) -> Self {
        Self::new(FailureKind::HandlerPanic, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(FailureKind::DeadlineExceeded, message)
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
