use anyhow::Result;
use std::sync::Arc;
use storeit_loadgen::{client, config, metrics, profile, runner, scenario, session, telemetry, users};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use client::ApiClient;
use config::Config;
use metrics::MetricsCollector;
use profile::LoadProfile;
use runner::LoadRunner;
use scenario::{Scenario, ScenarioPlan, WarehouseScenario};
use session::SessionManager;
use storeit_loadgen::retry::RetryPolicy;
use telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::load()?;

    info!(
        base_url = %cfg.target.base_url,
        vus = cfg.load.vus,
        duration_seconds = cfg.load.duration_seconds,
        users = cfg.load.test_users_count,
        "starting storeit load generator"
    );

    let pool = users::init_pool(cfg.load.test_users_count);
    let metrics = Arc::new(MetricsCollector::new());

    let retry = RetryPolicy::new(cfg.retry.max_attempts, cfg.retry.interval());
    let api = Arc::new(ApiClient::new(
        cfg.target.base_url.as_str(),
        cfg.target.http_timeout(),
        retry,
        Arc::clone(&metrics),
    )?);

    let sessions = SessionManager::new(Arc::clone(&api));
    let scenario: Arc<dyn Scenario> = Arc::new(WarehouseScenario::new(
        api,
        sessions,
        pool,
        ScenarioPlan::standard(&cfg.scenario),
        cfg.scenario.think_time_range(),
    ));

    let profile = LoadProfile::staged(
        cfg.load.ramp_up(),
        cfg.load.duration(),
        cfg.load.vus,
        cfg.load.ramp_down(),
    )
    .with_thresholds(cfg.thresholds.clone());

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        telemetry::shutdown_signal().await;
        cancel_on_signal.cancel();
    });

    let thresholds = profile.thresholds.clone();
    let runner = LoadRunner::new(profile, scenario, Arc::clone(&metrics));
    let summary = runner.run(cancel).await;

    info!(
        requests = summary.requests_total,
        transport_failures = summary.transport_failures,
        p95_ms = summary.latency.p95_ms,
        iterations_completed = summary.iterations_completed,
        iterations_early_exit = summary.iterations_early_exit,
        iterations_failed = summary.iterations_failed,
        "run finished"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let report = thresholds.evaluate(&summary);
    for gate in &report.gates {
        if gate.passed {
            info!(gate = gate.name, observed = gate.observed, limit = gate.limit, "threshold passed");
        } else {
            error!(gate = gate.name, observed = gate.observed, limit = gate.limit, "threshold failed");
        }
    }

    if !report.passed() {
        anyhow::bail!("thresholds failed: {}", report.failed_names().join(", "));
    }

    warn!("run complete");
    Ok(())
}
