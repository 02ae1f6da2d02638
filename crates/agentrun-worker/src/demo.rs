//! Stand-in handlers for the pipeline agents.
//!
//! Real agents wrap linters, detectors and LLM calls; these only simulate
//! latency and occasional failures so the runtimes can be exercised.

use std::time::Duration;

use agentrun_core::TaskId;
use agentrun_runtime::{BoxError, TaskHandler};
use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use tracing::debug;

/// Simulated agent.
pub struct DemoHandler {
    agent_id: String,
    max_work_ms: u64,
    failure_rate: f64,
}

impl DemoHandler {
    pub fn new(agent_id: impl Into<String>, max_work_ms: u64, failure_rate: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            max_work_ms,
            // NaN passes through clamp and would make gen_bool panic.
            failure_rate: if failure_rate.is_nan() {
                0.0
            } else {
                failure_rate.clamp(0.0, 1.0)
            },
        }
    }
}

#[async_trait]
impl TaskHandler for DemoHandler {
    async fn initialize(&self) -> Result<(), BoxError> {
        debug!(agent_id = %self.agent_id, "Demo handler ready");
        Ok(())
    }

    async fn process_task(&self, task_id: &TaskId, payload: Value) -> Result<Value, BoxError> {
        let (work_ms, fail) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(0..=self.max_work_ms),
                rng.gen_bool(self.failure_rate),
            )
        };
        tokio::time::sleep(Duration::from_millis(work_ms)).await;

        if fail {
            return Err(format!("simulated failure in {}", self.agent_id).into());
        }
        Ok(json!({
            "agent": self.agent_id,
            "task_id": task_id.as_str(),
            "work_ms": work_ms,
            "input": payload,
        }))
    }

    fn capabilities(&self) -> Vec<String> {
        capabilities_for(&self.agent_id)
    }
}

/// Capabilities advertised by each pipeline stage.
pub fn capabilities_for(agent_id: &str) -> Vec<String> {
    let caps: &[&str] = match agent_id {
        "code_analysis_agent" => &["project_structure", "complexity_metrics", "dependency_graph"],
        "bug_detection_agent" => &["static_analysis", "pattern_matching", "security_scan"],
        "fix_execution_agent" => &["patch_generation", "patch_application"],
        "test_validation_agent" => &["test_execution", "fix_validation"],
        "performance_optimization_agent" => &["profiling", "hotspot_detection"],
        "code_quality_agent" => &["style_check", "lint_report"],
        _ => &["generic"],
    };
    caps.iter().map(|c| c.to_string()).collect()
}
