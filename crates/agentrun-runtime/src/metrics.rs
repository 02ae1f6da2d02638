//! Runtime-wide task counters shared by all workers.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use agentrun_core::MetricsSnapshot;

const NO_ACTIVITY: i64 = i64::MIN;

/// Completion counters for one agent runtime.
///
/// Every field is atomic; workers update it concurrently without a lock.
#[derive(Debug)]
pub struct Metrics {
    completed: AtomicU64,
    failed: AtomicU64,
    processing_micros: AtomicU64,
    last_activity_ms: AtomicI64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            processing_micros: AtomicU64::new(0),
            last_activity_ms: AtomicI64::new(NO_ACTIVITY),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful task and how long its handler ran.
    pub fn record_completed(&self, elapsed: Duration, at: DateTime<Utc>) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.processing_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::SeqCst);
        self.touch(at);
    }

    /// Record a failed task.
    pub fn record_failed(&self, at: DateTime<Utc>) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.touch(at);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn total_processing_time(&self) -> Duration {
        Duration::from_micros(self.processing_micros.load(Ordering::SeqCst))
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        match self.last_activity_ms.load(Ordering::SeqCst) {
            NO_ACTIVITY => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Combine the counters with the registry's live task counts.
    pub fn snapshot(&self, active_count: usize, pending_count: usize) -> MetricsSnapshot {
        let completed = self.completed();
        let total = self.total_processing_time().as_secs_f64();
        MetricsSnapshot {
            completed,
            failed: self.failed(),
            total_processing_time_secs: total,
            avg_processing_time_secs: MetricsSnapshot::average(total, completed),
            last_activity: self.last_activity(),
            active_count,
            pending_count,
        }
    }

    fn touch(&self, at: DateTime<Utc>) {
        self.last_activity_ms
            .fetch_max(at.timestamp_millis(), Ordering::SeqCst);
    }
}
