use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tiercomp_core::{ErrorCode, OptLevel};

/// Scheduler counters, snapshotted by `Scheduler::metrics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    pub submitted_first_time: u64,
    pub submitted_recompile: u64,
    pub coalesced: u64,
    pub rejected: u64,
    /// Requests that ended with an installed artifact.
    pub completed: u64,
    /// Requests that ended without one, by final status code.
    pub failed: BTreeMap<String, u64>,
    /// Compiles finished per optimization level.
    pub compiled_by_level: BTreeMap<String, u64>,
    pub retries: u64,
    /// First-time requests lowered because of backlog.
    pub backlog_downgrades: u64,
    pub artifact_loads: u64,
    pub artifact_load_failures: u64,
    pub artifact_stores: u64,
    pub upgrades_queued: u64,
    pub throttles: u64,
    pub activations: u64,
    pub suspensions: u64,
    pub starvation_events: u64,
    /// Synchronous waiters woken with a result.
    pub rendezvous_notifications: u64,
    pub queue_size: usize,
    pub peak_queue_size: usize,
    pub low_priority_queue_size: usize,
    pub queue_weight: u64,
    pub active_workers: usize,
    pub avg_compile_duration: Duration,
    pub last_compile_at: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    /// Record a finished generator or artifact-load attempt.
    pub fn record_compile(&mut self, level: OptLevel, duration: Duration) {
        let count = self
            .compiled_by_level
            .entry(level.as_str().to_string())
            .or_default();
        *count += 1;
        self.last_compile_at = Some(Utc::now());

        let total: u64 = self.compiled_by_level.values().sum();
        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_compile_duration = if total == 1 {
            duration
        } else {
            let prev_nanos = self.avg_compile_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / total as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    pub fn record_failure(&mut self, code: ErrorCode) {
        *self.failed.entry(code.as_str().to_string()).or_default() += 1;
    }

    pub fn failures(&self, code: ErrorCode) -> u64 {
        self.failed.get(code.as_str()).copied().unwrap_or(0)
    }

    pub fn observe_queue(&mut self, len: usize) {
        self.queue_size = len;
        self.peak_queue_size = self.peak_queue_size.max(len);
    }
}
