//! Hosts the runtimes of several pipeline agents.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{info, warn};

use agentrun_core::{TaskId, TaskSnapshot};

use crate::{
    AgentRuntime, AgentSettings, PipelineConfig, RuntimeError, RuntimeReport, ShutdownReport,
    TaskHandler,
};

/// Registry of agent runtimes keyed by agent id.
///
/// Each runtime keeps its own queue, workers and metrics; the supervisor
/// only routes calls and drives lifecycles as a group.
#[derive(Default)]
pub struct AgentSupervisor {
    agents: RwLock<BTreeMap<String, Arc<AgentRuntime>>>,
}

impl AgentSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a runtime. Ids must be unique.
    pub async fn register(&self, runtime: AgentRuntime) -> Result<Arc<AgentRuntime>, RuntimeError> {
        let mut agents = self.agents.write().await;
        let agent_id = runtime.agent_id().to_string();
        if agents.contains_key(&agent_id) {
            return Err(RuntimeError::AgentAlreadyRegistered(agent_id));
        }

        let runtime = Arc::new(runtime);
        agents.insert(agent_id.clone(), runtime.clone());
        info!(agent_id = %agent_id, "Agent registered");
        Ok(runtime)
    }

    /// Build and register a runtime from pipeline settings.
    ///
    /// Returns `None` without registering anything when the agent is disabled.
    pub async fn register_with_settings(
        &self,
        agent_id: &str,
        settings: &AgentSettings,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Option<Arc<AgentRuntime>>, RuntimeError> {
        if !settings.enabled {
            info!(agent_id = %agent_id, "Agent disabled, skipping");
            return Ok(None);
        }
        let runtime = AgentRuntime::new(agent_id, settings.runtime.clone(), handler);
        self.register(runtime).await.map(Some)
    }

    /// Register every enabled agent of the pipeline that `handler_for`
    /// supplies a handler for. Returns the ids that were registered.
    pub async fn register_pipeline<F>(
        &self,
        config: &PipelineConfig,
        mut handler_for: F,
    ) -> Result<Vec<String>, RuntimeError>
    where
        F: FnMut(&str) -> Option<Arc<dyn TaskHandler>>,
    {
        let mut registered = Vec::new();
        for (agent_id, settings) in config.enabled() {
            let Some(handler) = handler_for(agent_id.as_str()) else {
                warn!(agent_id = %agent_id, "No handler available for agent, skipping");
                continue;
            };
            if self
                .register_with_settings(agent_id.as_str(), settings, handler)
                .await?
                .is_some()
            {
                registered.push(agent_id.clone());
            }
        }
        Ok(registered)
    }

    /// Remove a runtime, stopping it first.
    pub async fn unregister(&self, agent_id: &str) -> Result<ShutdownReport, RuntimeError> {
        let runtime = self
            .agents
            .write()
            .await
            .remove(agent_id)
            .ok_or_else(|| RuntimeError::AgentNotFound(agent_id.to_string()))?;

        let report = runtime.stop().await?;
        info!(agent_id = %agent_id, "Agent unregistered");
        Ok(report)
    }

    pub async fn get(&self, agent_id: &str) -> Option<Arc<AgentRuntime>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn agent_ids(&self) -> Vec<String> {
        self.agents.read().await.keys().cloned().collect()
    }

    /// Start every registered runtime. One agent failing to initialize does
    /// not prevent the others from starting.
    pub async fn start_all(&self) -> Vec<(String, Result<(), RuntimeError>)> {
        let mut results = Vec::new();
        for runtime in self.runtimes().await {
            let result = runtime.start().await;
            if let Err(e) = &result {
                warn!(agent_id = %runtime.agent_id(), error = %e, "Agent failed to start");
            }
            results.push((runtime.agent_id().to_string(), result));
        }
        results
    }

    /// Stop every registered runtime concurrently, so the whole group is
    /// bounded by the longest grace period rather than their sum.
    pub async fn stop_all(&self) -> Vec<(String, Result<ShutdownReport, RuntimeError>)> {
        let mut set = JoinSet::new();
        for runtime in self.runtimes().await {
            set.spawn(async move {
                let result = runtime.stop().await;
                (runtime.agent_id().to_string(), result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Stop task failed"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Route a submission to the named agent.
    pub async fn submit(
        &self,
        agent_id: &str,
        task_id: impl Into<TaskId>,
        payload: Value,
    ) -> Result<(), RuntimeError> {
        self.require(agent_id)
            .await?
            .submit_task(task_id, payload)
            .await
    }

    pub async fn task_status(
        &self,
        agent_id: &str,
        task_id: &TaskId,
    ) -> Result<Option<TaskSnapshot>, RuntimeError> {
        Ok(self.require(agent_id).await?.get_task_status(task_id).await)
    }

    /// Status reports of every runtime, in agent id order.
    pub async fn reports(&self) -> Vec<RuntimeReport> {
        let mut reports = Vec::new();
        for runtime in self.runtimes().await {
            reports.push(runtime.get_status().await);
        }
        reports
    }

    async fn require(&self, agent_id: &str) -> Result<Arc<AgentRuntime>, RuntimeError> {
        self.get(agent_id)
            .await
            .ok_or_else(|| RuntimeError::AgentNotFound(agent_id.to_string()))
    }

    /// Clone the runtime handles so no lock is held across lifecycle calls.
    async fn runtimes(&self) -> Vec<Arc<AgentRuntime>> {
        self.agents.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoxError, RuntimeConfig};
    use agentrun_core::{RuntimeStatus, TaskStatus};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::{Duration, Instant};

    struct EchoHandler {
        healthy: bool,
    }

    #[async_trait]
    impl TaskHandler for EchoHandler {
        async fn initialize(&self) -> Result<(), BoxError> {
            if self.healthy {
                Ok(())
            } else {
                Err("tool not installed".into())
            }
        }

        async fn process_task(&self, _task_id: &TaskId, payload: Value) -> Result<Value, BoxError> {
            Ok(payload)
        }

        fn capabilities(&self) -> Vec<String> {
            vec!["echo".to_string()]
        }
    }

    fn echo(healthy: bool) -> Arc<dyn TaskHandler> {
        Arc::new(EchoHandler { healthy })
    }

    fn runtime(agent_id: &str, healthy: bool) -> AgentRuntime {
        let config = RuntimeConfig::default().with_poll_interval(Duration::from_millis(20));
        AgentRuntime::new(agent_id, config, echo(healthy))
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let supervisor = AgentSupervisor::new();
        supervisor.register(runtime("analysis", true)).await.unwrap();

        let Err(err) = supervisor.register(runtime("analysis", true)).await else {
            panic!("duplicate registration accepted");
        };
        assert!(matches!(err, RuntimeError::AgentAlreadyRegistered(id) if id == "analysis"));
        assert_eq!(supervisor.agent_ids().await, vec!["analysis".to_string()]);
    }

    #[tokio::test]
    async fn test_routes_submissions_by_agent() {
        let supervisor = AgentSupervisor::new();
        supervisor.register(runtime("analysis", true)).await.unwrap();
        supervisor.register(runtime("detection", true)).await.unwrap();
        supervisor.start_all().await;

        supervisor.submit("detection", "t1", json!({"file": "a.py"})).await.unwrap();

        let id = TaskId::new("t1");
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let snapshot = supervisor.task_status("detection", &id).await.unwrap();
            if snapshot.as_ref().map(|s| s.status) == Some(TaskStatus::Completed) {
                break;
            }
            assert!(Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(supervisor.task_status("analysis", &id).await.unwrap().is_none());

        let err = supervisor.submit("missing", "t2", json!({})).await.unwrap_err();
        assert!(matches!(err, RuntimeError::AgentNotFound(_)));

        supervisor.stop_all().await;
    }

    #[tokio::test]
    async fn test_one_failed_start_does_not_block_others() {
        let supervisor = AgentSupervisor::new();
        supervisor.register(runtime("broken", false)).await.unwrap();
        supervisor.register(runtime("healthy", true)).await.unwrap();

        let results = supervisor.start_all().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_err());
        assert!(results[1].1.is_ok());

        let reports = supervisor.reports().await;
        assert_eq!(reports[0].runtime_status, RuntimeStatus::Error);
        assert_eq!(reports[1].runtime_status, RuntimeStatus::Running);

        let stopped = supervisor.stop_all().await;
        assert!(stopped.iter().all(|(_, result)| result.is_ok()));
        assert_eq!(
            supervisor.get("healthy").await.unwrap().status().await,
            RuntimeStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_register_pipeline_skips_disabled_and_unhandled() {
        let mut config = PipelineConfig::default();
        config
            .agents
            .get_mut("fix_execution_agent")
            .unwrap()
            .enabled = false;

        let supervisor = AgentSupervisor::new();
        let registered = supervisor
            .register_pipeline(&config, |agent_id| {
                (agent_id != "code_quality_agent").then(|| echo(true))
            })
            .await
            .unwrap();

        assert_eq!(registered.len(), 4);
        assert!(!registered.contains(&"fix_execution_agent".to_string()));
        assert!(!registered.contains(&"code_quality_agent".to_string()));
        let bug = supervisor.get("bug_detection_agent").await.unwrap();
        assert_eq!(bug.config().max_workers, 2);
    }

    #[tokio::test]
    async fn test_unregister_stops_runtime() {
        let supervisor = AgentSupervisor::new();
        let analysis = supervisor.register(runtime("analysis", true)).await.unwrap();
        analysis.start().await.unwrap();

        let report = supervisor.unregister("analysis").await.unwrap();
        assert!(report.is_clean());
        assert_eq!(analysis.status().await, RuntimeStatus::Stopped);
        assert!(supervisor.get("analysis").await.is_none());
        assert!(matches!(
            supervisor.unregister("analysis").await,
            Err(RuntimeError::AgentNotFound(_))
        ));
    }
}
