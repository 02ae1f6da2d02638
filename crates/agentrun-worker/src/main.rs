//! AgentRun Worker - hosts pipeline agent runtimes with demo handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use agentrun_core::TaskId;
use agentrun_runtime::{exposition, AgentSupervisor, PipelineConfig, TaskHandler};

mod config;
mod demo;

use config::Config;
use demo::DemoHandler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let filter = EnvFilter::try_from_env("AGENTRUN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::parse();

    let pipeline = match &config.pipeline {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    info!(agents = pipeline.agents.len(), "Pipeline settings loaded");

    let supervisor = AgentSupervisor::new();
    let registered = supervisor
        .register_pipeline(&pipeline, |agent_id| {
            let handler: Arc<dyn TaskHandler> = Arc::new(DemoHandler::new(
                agent_id,
                config.max_work_ms,
                config.failure_rate,
            ));
            Some(handler)
        })
        .await?;

    for (agent_id, result) in supervisor.start_all().await {
        if let Err(e) = result {
            error!(agent_id = %agent_id, error = %e, "Agent did not start");
        }
    }

    let mut submitted = Vec::new();
    for agent_id in &registered {
        for n in 0..config.tasks {
            let task_id = TaskId::generate();
            let payload = json!({ "project_path": format!("demo/project-{n}") });
            match supervisor.submit(agent_id, task_id.clone(), payload).await {
                Ok(()) => submitted.push((agent_id.clone(), task_id)),
                Err(e) => warn!(agent_id = %agent_id, error = %e, "Submission rejected"),
            }
        }
    }
    info!(tasks = submitted.len(), "Batch submitted");

    if !wait_for_batch(&supervisor, &submitted, config.wait_timeout()).await {
        warn!(
            wait_secs = config.wait_secs,
            "Batch did not finish before the wait timeout"
        );
    }

    let reports = supervisor.reports().await;
    println!("{}", serde_json::to_string_pretty(&reports)?);
    if config.prometheus {
        println!("{}", exposition::render(&reports));
    }

    for (agent_id, result) in supervisor.stop_all().await {
        match result {
            Ok(report) if !report.is_clean() => warn!(
                agent_id = %agent_id,
                forced_workers = report.forced_workers,
                abandoned_tasks = report.abandoned_tasks,
                "Agent stopped forcefully"
            ),
            Ok(_) => {}
            Err(e) => error!(agent_id = %agent_id, error = %e, "Agent failed to stop"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Poll until every submitted task is terminal. Returns false on timeout.
async fn wait_for_batch(
    supervisor: &AgentSupervisor,
    submitted: &[(String, TaskId)],
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let mut open = 0usize;
        for (agent_id, task_id) in submitted {
            let terminal = matches!(
                supervisor.task_status(agent_id, task_id).await,
                Ok(Some(snapshot)) if snapshot.status.is_terminal()
            );
            if !terminal {
                open += 1;
            }
        }

        if open == 0 {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
