//! Runtime and pipeline configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::RuntimeError;

/// Configuration of a single agent runtime.
///
/// Read once by `start`; changing it requires building a new runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of concurrent workers draining the queue.
    pub max_workers: usize,

    /// How long an idle worker waits on the queue before re-checking
    /// whether the runtime still accepts work (milliseconds).
    pub poll_interval_ms: u64,

    /// How long `stop` waits for workers before aborting them (milliseconds).
    pub grace_period_ms: u64,

    /// Optional per-task deadline (milliseconds). Unset means handlers may
    /// run indefinitely.
    pub task_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_workers: 1,
            poll_interval_ms: 1_000,
            grace_period_ms: 3_000,
            task_timeout_ms: None,
        }
    }
}

impl RuntimeConfig {
    /// Builder method to set the worker count.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Builder method to set the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method to set the shutdown grace period.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_ms = grace.as_millis() as u64;
        self
    }

    /// Builder method to set a per-task deadline.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    /// Check the values `start` relies on.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.max_workers == 0 {
            return Err(RuntimeError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(RuntimeError::InvalidConfig(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.task_timeout_ms == Some(0) {
            return Err(RuntimeError::InvalidConfig(
                "task_timeout_ms must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for one pipeline agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Disabled agents are not registered with the supervisor.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(flatten)]
    pub runtime: RuntimeConfig,
}

fn default_enabled() -> bool {
    true
}

impl AgentSettings {
    pub fn new(max_workers: usize) -> Self {
        Self {
            enabled: true,
            runtime: RuntimeConfig::default().with_max_workers(max_workers),
        }
    }
}

/// Settings for every agent of the pipeline, keyed by agent id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub agents: BTreeMap<String, AgentSettings>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let agents = [
            ("code_analysis_agent", 2),
            ("bug_detection_agent", 2),
            ("fix_execution_agent", 1),
            ("test_validation_agent", 2),
            ("performance_optimization_agent", 1),
            ("code_quality_agent", 1),
        ]
        .into_iter()
        .map(|(name, workers)| (name.to_string(), AgentSettings::new(workers)))
        .collect();

        Self { agents }
    }
}

impl PipelineConfig {
    /// Parse settings from a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, RuntimeError> {
        let config: Self = serde_json::from_str(raw)?;
        for (agent_id, settings) in &config.agents {
            settings
                .runtime
                .validate()
                .map_err(|e| RuntimeError::Config(format!("{agent_id}: {e}")))?;
        }
        Ok(config)
    }

    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Enabled agents in id order.
    pub fn enabled(&self) -> impl Iterator<Item = (&String, &AgentSettings)> {
        self.agents.iter().filter(|(_, settings)| settings.enabled)
    }
}
