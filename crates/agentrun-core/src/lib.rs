//! AgentRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - The async runtime
//! - Task handlers
//! - Logging
//!
//! All types here describe tasks and agent runtimes as seen by callers of
//! the execution framework.

pub mod error;
pub mod ids;
pub mod metrics;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::{CoreError, FailureKind, TaskFailure};
pub use ids::TaskId;
pub use metrics::MetricsSnapshot;
pub use status::{RuntimeStatus, TaskStatus};
pub use task::{TaskRecord, TaskSnapshot};
