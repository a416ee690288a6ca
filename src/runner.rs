//! The virtual-user engine.
//!
//! A supervisor loop tracks the profile's concurrency target, spawning a
//! task per virtual user on the way up and cancelling the newest ones on the
//! way down. Cancellation is cooperative: a virtual user finishes its
//! current iteration, records the outcome, and only then stops, so the
//! shared metrics never see a half-recorded iteration.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{MetricsCollector, RunSummary};
use crate::profile::LoadProfile;
use crate::scenario::{IterationOutcome, Scenario};

const SUPERVISOR_TICK: Duration = Duration::from_millis(250);

pub struct LoadRunner {
    profile: LoadProfile,
    scenario: Arc<dyn Scenario>,
    metrics: Arc<MetricsCollector>,
}

struct VuWorker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl LoadRunner {
    pub fn new(
        profile: LoadProfile,
        scenario: Arc<dyn Scenario>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            profile,
            scenario,
            metrics,
        }
    }

    /// Drive the full profile, then drain every virtual user and snapshot
    /// the metrics. Cancelling `cancel` ends the run early; in-flight
    /// iterations still finish.
    pub async fn run(&self, cancel: CancellationToken) -> RunSummary {
        let total = self.profile.total_duration();
        let started = Instant::now();
        let mut ticker = tokio::time::interval(SUPERVISOR_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut workers: Vec<VuWorker> = Vec::new();
        let mut retired: Vec<JoinHandle<()>> = Vec::new();
        let mut next_vu: u32 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => {
                    info!("run cancelled before the profile completed");
                    break;
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= total {
                break;
            }

            let desired = self.profile.target_at(elapsed) as usize;
            while workers.len() < desired {
                let vu = next_vu;
                next_vu += 1;
                let token = CancellationToken::new();
                let handle = tokio::spawn(vu_loop(
                    Arc::clone(&self.scenario),
                    Arc::clone(&self.metrics),
                    vu,
                    token.clone(),
                ));
                debug!(vu, active = workers.len() + 1, "virtual user started");
                workers.push(VuWorker { token, handle });
            }
            while workers.len() > desired {
                if let Some(worker) = workers.pop() {
                    worker.token.cancel();
                    retired.push(worker.handle);
                }
            }
        }

        info!(
            active = workers.len(),
            spawned_total = next_vu,
            "draining virtual users"
        );
        for worker in &workers {
            worker.token.cancel();
        }
        for handle in workers.into_iter().map(|w| w.handle).chain(retired) {
            if let Err(err) = handle.await {
                warn!(error = %err, "virtual user task panicked");
            }
        }

        self.metrics.snapshot()
    }
}

/// One virtual user: run iterations until cancelled, recording every
/// outcome. A failed iteration never aborts the run.
async fn vu_loop(
    scenario: Arc<dyn Scenario>,
    metrics: Arc<MetricsCollector>,
    vu: u32,
    token: CancellationToken,
) {
    while !token.is_cancelled() {
        match scenario.run_iteration(vu).await {
            Ok(IterationOutcome::Completed) => metrics.record_iteration_completed(),
            Ok(IterationOutcome::EarlyExit { after }) => {
                debug!(vu, step = %after, "iteration ended early");
                metrics.record_iteration_early_exit();
            }
            Err(err) => {
                warn!(vu, error = %err, "iteration failed");
                metrics.record_iteration_failed();
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(scenario.think_time()) => {}
        }
    }
    debug!(vu, "virtual user stopped");
}
