//! Runtime errors.

use agentrun_core::RuntimeStatus;
use thiserror::Error;

/// Errors returned by agent runtimes and the supervisor.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The handler's `initialize` failed; the runtime is now in `Error`.
    #[error("Agent '{agent_id}' failed to initialize: {reason}")]
    InitFailed { agent_id: String, reason: String },

    /// The runtime configuration cannot be used.
    #[error("Invalid runtime config: {0}")]
    InvalidConfig(String),

    /// Lifecycle call not allowed in the current state.
    #[error("Invalid runtime transition: {from} -> {to}")]
    InvalidTransition {
        from: RuntimeStatus,
        to: RuntimeStatus,
    },

    /// Submission while the runtime is not running.
    #[error("Agent '{agent_id}' is not accepting tasks (status: {status})")]
    NotAccepting {
        agent_id: String,
        status: RuntimeStatus,
    },

    /// A worker panicked; the runtime is now in `Error`.
    #[error("Agent '{agent_id}' lost {count} worker(s) to a panic")]
    WorkerPanicked { agent_id: String, count: usize },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent already registered: {0}")]
    AgentAlreadyRegistered(String),

    /// Settings could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}
