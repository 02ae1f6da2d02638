//! Demo host configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Host the pipeline's agent runtimes with demo handlers and push a batch
/// of tasks through them.
#[derive(Debug, Parser)]
#[command(name = "agentrun-worker")]
#[command(about = "Run pipeline agent runtimes with demo handlers", long_about = None)]
pub struct Config {
    /// Pipeline settings file (JSON). Built-in defaults when omitted.
    #[arg(short, long)]
    pub pipeline: Option<PathBuf>,

    /// Number of tasks to submit to each agent.
    #[arg(short, long, default_value_t = 5)]
    pub tasks: usize,

    /// Upper bound of the simulated work per task (milliseconds).
    #[arg(long, default_value_t = 200)]
    pub max_work_ms: u64,

    /// Probability that a simulated task fails, between 0 and 1.
    #[arg(long, default_value_t = 0.1, value_parser = parse_probability)]
    pub failure_rate: f64,

    /// How long to wait for the batch before shutting down (seconds).
    #[arg(long, default_value_t = 30)]
    pub wait_secs: u64,

    /// Print Prometheus metrics after the batch.
    #[arg(long)]
    pub prometheus: bool,
}

fn parse_probability(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{raw} is not a probability between 0 and 1"))
    }
}

impl Config {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: None,
            tasks: 5,
            max_work_ms: 200,
            failure_rate: 0.1,
            wait_secs: 30,
            prometheus: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_match_default() {
        let parsed = Config::parse_from(["agentrun-worker"]);
        let defaults = Config::default();
        assert_eq!(parsed.tasks, defaults.tasks);
        assert_eq!(parsed.max_work_ms, defaults.max_work_ms);
        assert_eq!(parsed.wait_timeout(), Duration::from_secs(30));
        assert!(parsed.pipeline.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let parsed = Config::parse_from([
            "agentrun-worker",
            "--pipeline",
            "agents.json",
            "--tasks",
            "12",
            "--failure-rate",
            "0.5",
            "--prometheus",
        ]);
        assert_eq!(parsed.pipeline, Some(PathBuf::from("agents.json")));
        assert_eq!(parsed.tasks, 12);
        assert_eq!(parsed.failure_rate, 0.5);
        assert!(parsed.prometheus);
    }

    #[test]
    fn test_failure_rate_must_be_a_probability() {
        for raw in ["nan", "inf", "-0.1", "1.5", "often"] {
            let parsed = Config::try_parse_from(["agentrun-worker", "--failure-rate", raw]);
            assert!(parsed.is_err(), "accepted --failure-rate {raw}");
        }
        let parsed = Config::try_parse_from(["agentrun-worker", "--failure-rate", "1"]).unwrap();
        assert_eq!(parsed.failure_rate, 1.0);
    }
}
