//! AgentRun Runtime Library
//!
//! Generic task-execution framework shared by every pipeline agent. An
//! [`AgentRuntime`] owns a FIFO work queue, a registry of task records and a
//! pool of workers that feed queued tasks to an agent-specific
//! [`TaskHandler`]. The [`AgentSupervisor`] hosts several runtimes by agent id.

pub mod config;
pub mod error;
pub mod exposition;
pub mod handler;
pub mod metrics;
pub mod registry;
pub mod runtime;
pub mod supervisor;
mod worker;

pub use config::{AgentSettings, PipelineConfig, RuntimeConfig};
pub use error::RuntimeError;
pub use handler::{BoxError, TaskHandler};
pub use metrics::Metrics;
pub use registry::TaskRegistry;
pub use runtime::{AgentRuntime, RuntimeReport, ShutdownReport};
pub use supervisor::AgentSupervisor;
