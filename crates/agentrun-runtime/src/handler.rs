//! Contract between a runtime and the agent logic it drives.

use agentrun_core::TaskId;
use async_trait::async_trait;
use serde_json::Value;

/// Error type handlers may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Agent-specific work executed by an [`AgentRuntime`](crate::AgentRuntime).
///
/// The runtime never looks inside payloads or results; it only sequences
/// calls to these methods.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Prepare the agent. Called once per `start`; an error keeps the
    /// runtime from spawning workers.
    async fn initialize(&self) -> Result<(), BoxError>;

    /// Execute one task. Called at most once per submission.
    async fn process_task(&self, task_id: &TaskId, payload: Value) -> Result<Value, BoxError>;

    /// Describe what this agent can do. Must be side-effect free.
    fn capabilities(&self) -> Vec<String>;
}
