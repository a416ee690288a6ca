//! End-to-end scenario tests against a mock storeit API.
//!
//! These verify the journey's call pattern: dependent creates in order, the
//! org guard, header scoping, the fixed read battery, and the rule that
//! HTTP-level rejections are never retried.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use storeit_loadgen::client::ApiClient;
use storeit_loadgen::config::ScenarioConfig;
use storeit_loadgen::metrics::MetricsCollector;
use storeit_loadgen::retry::RetryPolicy;
use storeit_loadgen::scenario::{
    IterationOutcome, Scenario, ScenarioPlan, StepKind, WarehouseScenario,
};
use storeit_loadgen::session::{auth_headers, SessionManager, SessionToken};
use storeit_loadgen::users;

const TOKEN: &str = "sess-token";

fn scenario_config(instances: bool, tasks: bool, updates: bool) -> ScenarioConfig {
    ScenarioConfig {
        think_time_min_seconds: 0,
        think_time_max_seconds: 0,
        create_instances: instances,
        create_tasks: tasks,
        update_entities: updates,
    }
}

fn build_scenario(
    server: &MockServer,
    cfg: &ScenarioConfig,
    metrics: Arc<MetricsCollector>,
) -> WarehouseScenario {
    let client = Arc::new(
        ApiClient::new(
            server.uri(),
            Duration::from_secs(5),
            RetryPolicy::new(3, Duration::ZERO),
            metrics,
        )
        .expect("client should build"),
    );
    let sessions = SessionManager::new(Arc::clone(&client));
    WarehouseScenario::new(
        client,
        sessions,
        users::init_pool(3),
        ScenarioPlan::standard(cfg),
        cfg.think_time_range(),
    )
}

fn created(id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": { "id": id } }))
}

fn listing() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": [] }))
}

async fn mount_auth(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/test"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", format!("storeit_session={TOKEN}; Path=/; HttpOnly").as_str()),
        )
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_core_journey(server: &MockServer) {
    mount_auth(server).await;

    Mock::given(method("POST"))
        .and(path("/orgs"))
        .and(header("cookie", format!("storeit_session={TOKEN}").as_str()))
        .respond_with(created("org-1"))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/units"))
        .and(header("x-organization-id", "org-1"))
        .respond_with(created("unit-1"))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/storage-groups"))
        .respond_with(created("sg-1"))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cells-groups"))
        .respond_with(created("cg-1"))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cells-groups/cg-1/cells"))
        .respond_with(created("cell-1"))
        .expect(2)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/items"))
        .respond_with(created("item-1"))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/items/item-1/variants"))
        .respond_with(created("var-1"))
        .expect(1)
        .mount(server)
        .await;

    for list_path in [
        "/orgs",
        "/units",
        "/storage-groups",
        "/items",
        "/tasks",
        "/cells-groups",
        "/items/item-1/variants",
    ] {
        Mock::given(method("GET"))
            .and(path(list_path))
            .and(header("x-organization-id", "org-1"))
            .respond_with(listing())
            .expect(1)
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn successful_iteration_issues_the_full_call_pattern() {
    let server = MockServer::start().await;
    mount_core_journey(&server).await;

    let metrics = Arc::new(MetricsCollector::new());
    let scenario = build_scenario(&server, &scenario_config(false, false, false), Arc::clone(&metrics));

    let outcome = scenario.run_iteration(0).await.expect("iteration should succeed");
    assert_eq!(outcome, IterationOutcome::Completed);

    // 1 auth + 8 creates + 7 reads, all completed exchanges.
    let summary = metrics.snapshot();
    assert_eq!(summary.requests_total, 16);
    assert_eq!(summary.transport_failures, 0);

    // Every create precedes the read battery.
    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 16);
    let methods: Vec<String> = requests.iter().map(|r| r.method.to_string()).collect();
    assert!(methods[..9].iter().all(|m| m == "POST"));
    assert!(methods[9..].iter().all(|m| m == "GET"));
}

#[tokio::test]
async fn org_create_failure_stops_the_dependent_chain() {
    let server = MockServer::start().await;
    mount_auth(&server).await;

    // Application-level rejection: logged, returned, never retried.
    Mock::given(method("POST"))
        .and(path("/orgs"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/units"))
        .respond_with(created("unit-1"))
        .expect(0)
        .mount(&server)
        .await;

    let metrics = Arc::new(MetricsCollector::new());
    let scenario = build_scenario(&server, &scenario_config(false, false, false), metrics);

    let outcome = scenario.run_iteration(0).await.expect("guard is not an error");
    assert_eq!(
        outcome,
        IterationOutcome::EarlyExit {
            after: StepKind::CreateOrganization
        }
    );

    // Only the auth call and the single (unretried) org create went out.
    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn missing_session_cookie_degrades_to_an_empty_token() {
    let server = MockServer::start().await;

    // Authentication "succeeds" but never sets the session cookie.
    Mock::given(method("POST"))
        .and(path("/auth/test"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    // The unauthenticated org create is rejected; the iteration exits early
    // rather than failing - the failure surfaces in status counts.
    Mock::given(method("POST"))
        .and(path("/orgs"))
        .and(header("cookie", "storeit_session="))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthenticated"))
        .expect(1)
        .mount(&server)
        .await;

    let metrics = Arc::new(MetricsCollector::new());
    let scenario = build_scenario(&server, &scenario_config(false, false, false), Arc::clone(&metrics));

    let outcome = scenario.run_iteration(0).await.expect("fail-soft auth");
    assert_eq!(
        outcome,
        IterationOutcome::EarlyExit {
            after: StepKind::CreateOrganization
        }
    );
    assert_eq!(metrics.snapshot().status_counts.get(&401), Some(&1));
}

#[tokio::test]
async fn optional_steps_extend_the_journey_when_enabled() {
    let server = MockServer::start().await;
    mount_core_journey(&server).await;

    Mock::given(method("POST"))
        .and(path("/items/item-1/instances"))
        .respond_with(created("inst-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(created("task-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/items/item-1"))
        .respond_with(created("item-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/items/item-1/variants/var-1"))
        .respond_with(created("var-1"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/cells-groups/cg-1/cells/cell-1"))
        .respond_with(created("cell-1"))
        .expect(1)
        .mount(&server)
        .await;

    let metrics = Arc::new(MetricsCollector::new());
    let scenario = build_scenario(&server, &scenario_config(true, true, true), metrics);

    let outcome = scenario.run_iteration(0).await.expect("full journey");
    assert_eq!(outcome, IterationOutcome::Completed);
}

#[tokio::test]
async fn transport_failures_are_retried_then_surfaced() {
    // Bind and immediately release a port so nothing is listening on it.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let metrics = Arc::new(MetricsCollector::new());
    let client = ApiClient::new(
        format!("http://{addr}"),
        Duration::from_secs(1),
        RetryPolicy::new(3, Duration::ZERO),
        Arc::clone(&metrics),
    )
    .expect("client should build");

    let ctx = auth_headers(&SessionToken::new("tok"), None);
    let err = client.get("/orgs", &ctx).await.expect_err("nothing listens there");
    assert_eq!(err.attempts, 3);

    let summary = metrics.snapshot();
    assert_eq!(summary.transport_failures, 3);
    assert_eq!(summary.requests_total, 3);
    assert!((summary.failure_rate - 1.0).abs() < 1e-9);
}
