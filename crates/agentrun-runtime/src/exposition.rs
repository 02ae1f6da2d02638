//! Prometheus text exposition of agent runtime metrics.

use std::fmt::Write;

use agentrun_core::RuntimeStatus;

use crate::{AgentSupervisor, RuntimeReport};

const STATUSES: [RuntimeStatus; 5] = [
    RuntimeStatus::Stopped,
    RuntimeStatus::Starting,
    RuntimeStatus::Running,
    RuntimeStatus::Stopping,
    RuntimeStatus::Error,
];

/// Collect metrics from every supervised runtime as Prometheus text.
pub async fn collect_metrics(supervisor: &AgentSupervisor) -> String {
    render(&supervisor.reports().await)
}

/// Format runtime reports in Prometheus text format.
pub fn render(reports: &[RuntimeReport]) -> String {
    let mut output = String::new();

    write_header(
        &mut output,
        "agentrun_runtime_status",
        "Current lifecycle state of each agent runtime",
        "gauge",
    );
    for report in reports {
        for status in STATUSES {
            let value = u8::from(report.runtime_status == status);
            writeln!(
                output,
                "agentrun_runtime_status{{agent=\"{}\",status=\"{}\"}} {value}",
                report.agent_id, status
            )
            .ok();
        }
    }

    write_family(
        &mut output,
        reports,
        "agentrun_tasks_completed_total",
        "Tasks completed successfully",
        "counter",
        |r| r.metrics.completed.to_string(),
    );
    write_family(
        &mut output,
        reports,
        "agentrun_tasks_failed_total",
        "Tasks that ended in failure",
        "counter",
        |r| r.metrics.failed.to_string(),
    );
    write_family(
        &mut output,
        reports,
        "agentrun_task_processing_seconds_total",
        "Cumulative handler time of completed tasks",
        "counter",
        |r| r.metrics.total_processing_time_secs.to_string(),
    );
    write_family(
        &mut output,
        reports,
        "agentrun_task_processing_seconds_avg",
        "Average handler time of completed tasks",
        "gauge",
        |r| r.metrics.avg_processing_time_secs.to_string(),
    );
    write_family(
        &mut output,
        reports,
        "agentrun_tasks_active",
        "Tasks currently processing",
        "gauge",
        |r| r.metrics.active_count.to_string(),
    );
    write_family(
        &mut output,
        reports,
        "agentrun_tasks_pending",
        "Tasks waiting in the queue",
        "gauge",
        |r| r.metrics.pending_count.to_string(),
    );

    output
}

fn write_header(output: &mut String, name: &str, help: &str, kind: &str) {
    if !output.is_empty() {
        writeln!(output).ok();
    }
    writeln!(output, "# HELP {name} {help}").ok();
    writeln!(output, "# TYPE {name} {kind}").ok();
}

fn write_family<F>(
    output: &mut String,
    reports: &[RuntimeReport],
    name: &str,
    help: &str,
    kind: &str,
    value: F,
) where
    F: Fn(&RuntimeReport) -> String,
{
    write_header(output, name, help, kind);
    for report in reports {
        writeln!(output, "{name}{{agent=\"{}\"}} {}", report.agent_id, value(report)).ok();
    }
}
