//! Staged concurrency schedule and pass/fail gates.
//!
//! The profile answers one question during a run - how many virtual users
//! should be alive right now - and one after it: did the aggregated metrics
//! stay inside the declared thresholds. Thresholds are evaluated post-hoc
//! only, never enforced mid-run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::metrics::RunSummary;

/// A time window ramping linearly from the previous stage's target to this
/// stage's target.
#[derive(Debug, Clone)]
pub struct RampStage {
    pub duration: Duration,
    pub target: u32,
}

#[derive(Debug, Clone)]
pub struct LoadProfile {
    pub stages: Vec<RampStage>,
    pub thresholds: Thresholds,
}

impl LoadProfile {
    /// The classic three-stage shape: ramp up to the target, hold the
    /// plateau, ramp back down to zero.
    pub fn staged(ramp_up: Duration, plateau: Duration, target_vus: u32, ramp_down: Duration) -> Self {
        Self {
            stages: vec![
                RampStage { duration: ramp_up, target: target_vus },
                RampStage { duration: plateau, target: target_vus },
                RampStage { duration: ramp_down, target: 0 },
            ],
            thresholds: Thresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|stage| stage.duration).sum()
    }

    /// Desired concurrency at `elapsed`, interpolated within the active
    /// stage; zero once the schedule is exhausted.
    pub fn target_at(&self, elapsed: Duration) -> u32 {
        let mut stage_start = Duration::ZERO;
        let mut previous_target = 0u32;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                if stage.duration.is_zero() {
                    return stage.target;
                }
                let fraction =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let from = previous_target as f64;
                let to = stage.target as f64;
                return (from + (to - from) * fraction).round() as u32;
            }
            previous_target = stage.target;
            stage_start = stage_end;
        }

        0
    }
}

/// Declarative pass/fail gates over the whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    pub p95_latency_ms: f64,
    pub max_failure_rate: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            p95_latency_ms: 2000.0,
            max_failure_rate: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GateResult {
    pub name: &'static str,
    pub observed: f64,
    pub limit: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdReport {
    pub gates: Vec<GateResult>,
}

impl ThresholdReport {
    pub fn passed(&self) -> bool {
        self.gates.iter().all(|gate| gate.passed)
    }

    pub fn failed_names(&self) -> Vec<&'static str> {
        self.gates
            .iter()
            .filter(|gate| !gate.passed)
            .map(|gate| gate.name)
            .collect()
    }
}

impl Thresholds {
    pub fn evaluate(&self, summary: &RunSummary) -> ThresholdReport {
        let p95 = summary.latency.p95_ms as f64;
        ThresholdReport {
            gates: vec![
                GateResult {
                    name: "p95_latency_ms",
                    observed: p95,
                    limit: self.p95_latency_ms,
                    passed: p95 < self.p95_latency_ms,
                },
                GateResult {
                    name: "transport_failure_rate",
                    observed: summary.failure_rate,
                    limit: self.max_failure_rate,
                    passed: summary.failure_rate < self.max_failure_rate,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn profile() -> LoadProfile {
        LoadProfile::staged(secs(30), secs(60), 10, secs(30))
    }

    #[test]
    fn total_duration_sums_all_stages() {
        assert_eq!(profile().total_duration(), secs(120));
    }

    #[test]
    fn ramp_up_interpolates_from_zero() {
        let p = profile();
        assert_eq!(p.target_at(secs(0)), 0);
        assert_eq!(p.target_at(secs(15)), 5);
        assert_eq!(p.target_at(secs(29)), 10); // 29/30 rounds to 10
    }

    #[test]
    fn plateau_holds_the_target() {
        let p = profile();
        assert_eq!(p.target_at(secs(30)), 10);
        assert_eq!(p.target_at(secs(60)), 10);
        assert_eq!(p.target_at(secs(89)), 10);
    }

    #[test]
    fn ramp_down_reaches_zero_and_stays_there() {
        let p = profile();
        assert_eq!(p.target_at(secs(105)), 5);
        assert_eq!(p.target_at(secs(120)), 0);
        assert_eq!(p.target_at(secs(500)), 0);
    }

    #[test]
    fn ramp_up_is_monotonic() {
        let p = profile();
        let mut previous = 0;
        for s in 0..30 {
            let target = p.target_at(secs(s));
            assert!(target >= previous);
            previous = target;
        }
    }

    #[test]
    fn thresholds_pass_on_an_empty_run() {
        let summary = MetricsCollector::new().snapshot();
        let report = Thresholds::default().evaluate(&summary);
        assert!(report.passed());
    }

    #[test]
    fn slow_p95_fails_the_latency_gate_only() {
        let collector = MetricsCollector::new();
        for _ in 0..100 {
            collector.record_request(200, Duration::from_millis(3000));
        }
        let report = Thresholds::default().evaluate(&collector.snapshot());
        assert!(!report.passed());
        assert_eq!(report.failed_names(), vec!["p95_latency_ms"]);
    }

    #[test]
    fn transport_failures_fail_the_rate_gate() {
        let collector = MetricsCollector::new();
        for _ in 0..90 {
            collector.record_request(200, Duration::from_millis(10));
        }
        for _ in 0..10 {
            collector.record_transport_failure();
        }
        let report = Thresholds::default().evaluate(&collector.snapshot());
        assert!(report
            .failed_names()
            .contains(&"transport_failure_rate"));
    }
}
