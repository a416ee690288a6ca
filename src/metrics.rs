//! Run-wide request and iteration accounting.
//!
//! Every virtual user records into one shared collector; counters are
//! lock-free and the latency reservoir sits behind a short-lived mutex, so
//! recording never blocks an unrelated virtual user for long. Snapshots are
//! taken once, after the run drains.

use chrono::{DateTime, FixedOffset, Local};
use itertools::Itertools;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

pub struct MetricsCollector {
    run_id: Uuid,
    started_at: DateTime<FixedOffset>,
    requests_total: AtomicU64,
    transport_failures: AtomicU64,
    iterations_completed: AtomicU64,
    iterations_early_exit: AtomicU64,
    iterations_failed: AtomicU64,
    latencies_ms: Mutex<Vec<u64>>,
    status_counts: Mutex<BTreeMap<u16, u64>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Local::now().fixed_offset(),
            requests_total: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
            iterations_completed: AtomicU64::new(0),
            iterations_early_exit: AtomicU64::new(0),
            iterations_failed: AtomicU64::new(0),
            latencies_ms: Mutex::new(Vec::new()),
            status_counts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record a completed HTTP exchange, whatever its status code.
    pub fn record_request(&self, status: u16, latency: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.latencies_ms.lock().push(latency.as_millis() as u64);
        *self.status_counts.lock().entry(status).or_insert(0) += 1;
    }

    /// Record an attempt that never produced an HTTP response.
    pub fn record_transport_failure(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_iteration_completed(&self) {
        self.iterations_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_iteration_early_exit(&self) {
        self.iterations_early_exit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_iteration_failed(&self) {
        self.iterations_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunSummary {
        let requests_total = self.requests_total.load(Ordering::Relaxed);
        let transport_failures = self.transport_failures.load(Ordering::Relaxed);
        let failure_rate = if requests_total > 0 {
            transport_failures as f64 / requests_total as f64
        } else {
            0.0
        };

        RunSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            requests_total,
            transport_failures,
            failure_rate,
            latency: LatencyStats::from_samples(&self.latencies_ms.lock()),
            status_counts: self.status_counts.lock().clone(),
            iterations_completed: self.iterations_completed.load(Ordering::Relaxed),
            iterations_early_exit: self.iterations_early_exit.load(Ordering::Relaxed),
            iterations_failed: self.iterations_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregated view of one run, used for the final report and the threshold
/// verdict.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<FixedOffset>,
    pub requests_total: u64,
    pub transport_failures: u64,
    /// Transport-level failures over all attempts; HTTP error statuses do
    /// not count as failures here.
    pub failure_rate: f64,
    pub latency: LatencyStats,
    pub status_counts: BTreeMap<u16, u64>,
    pub iterations_completed: u64,
    pub iterations_early_exit: u64,
    pub iterations_failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p95_ms: u64,
}

impl LatencyStats {
    pub fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self {
                count: 0,
                mean_ms: 0.0,
                min_ms: 0,
                max_ms: 0,
                p95_ms: 0,
            };
        }

        let sorted: Vec<u64> = samples.iter().copied().sorted().collect();
        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();

        Self {
            count: count as u64,
            mean_ms: sum as f64 / count as f64,
            min_ms: sorted[0],
            max_ms: sorted[count - 1],
            p95_ms: sorted[percentile_index(count, 0.95)],
        }
    }
}

/// Nearest-rank percentile index for a sorted sample of `count` elements.
fn percentile_index(count: usize, percentile: f64) -> usize {
    let rank = (percentile * count as f64).ceil() as usize;
    rank.clamp(1, count) - 1
}
