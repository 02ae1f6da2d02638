//! Point-in-time view of an agent runtime's counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What `get_metrics` reports for a runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Tasks that completed successfully.
    pub completed: u64,
    /// Tasks that failed.
    pub failed: u64,
    /// Sum of handler run time over completed tasks, in seconds.
    pub total_processing_time_secs: f64,
    /// `total_processing_time_secs / max(1, completed)`.
    pub avg_processing_time_secs: f64,
    /// Last time any task reached a terminal state.
    pub last_activity: Option<DateTime<Utc>>,
    /// Tasks currently `Processing`.
    pub active_count: usize,
    /// Tasks currently `Pending`.
    pub pending_count: usize,
}

impl MetricsSnapshot {
    /// Average processing time; well-defined when nothing has completed yet.
    pub fn average(total_secs: f64, completed: u64) -> f64 {
        (total_secs / completed.max(1) as f64).max(0.0)
    }

    /// Number of tasks that reached a terminal state.
    pub fn terminal(&self) -> u64 {
        self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_with_no_completions() {
        assert_eq!(MetricsSnapshot::average(0.0, 0), 0.0);
        assert_eq!(MetricsSnapshot::average(1.5, 0), 1.5);
    }

    #[test]
    fn test_average() {
        assert!((MetricsSnapshot::average(3.0, 4) - 0.75).abs() < f64::EPSILON);
    }
}
