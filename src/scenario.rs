//! The end-to-end user journey executed once per virtual-user iteration.
//!
//! Each iteration authenticates a random synthetic user, creates an
//! organization, a warehouse unit, storage structures and catalog entities
//! under it, then issues the read battery a typical client produces. Every
//! id in the chain is local to the iteration; nothing leaks between
//! concurrently running virtual users.
//!
//! Steps are declared with explicit prerequisites so optional parts of the
//! journey (instances, tasks, updates) can be toggled off without
//! restructuring the chain; a step whose prerequisite is disabled is skipped
//! together with it, since a missing id cannot be fabricated.

use async_trait::async_trait;
use rand::distributions::{Alphanumeric, DistString};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::{ApiClient, ApiResponse, ResponseError};
use crate::config::ScenarioConfig;
use crate::retry::RetryExhausted;
use crate::session::{auth_headers, RequestContext, SessionManager};
use crate::users::UserPool;

/// One named unit of the journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum StepKind {
    Authenticate,
    CreateOrganization,
    CreateUnit,
    CreateStorageGroup,
    CreateCellGroup,
    CreateCells,
    CreateItem,
    CreateVariant,
    CreateInstance,
    CreateTask,
    UpdateEntities,
    ListReads,
}

#[derive(Debug, Clone)]
pub struct StepSpec {
    pub kind: StepKind,
    pub enabled: bool,
    pub requires: &'static [StepKind],
}

/// Declarative step list with explicit dependencies, in execution order.
#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    steps: Vec<StepSpec>,
}

impl ScenarioPlan {
    pub fn standard(cfg: &ScenarioConfig) -> Self {
        use StepKind::*;
        let steps = vec![
            StepSpec { kind: Authenticate, enabled: true, requires: &[] },
            StepSpec { kind: CreateOrganization, enabled: true, requires: &[Authenticate] },
            StepSpec { kind: CreateUnit, enabled: true, requires: &[CreateOrganization] },
            StepSpec { kind: CreateStorageGroup, enabled: true, requires: &[CreateUnit] },
            StepSpec { kind: CreateCellGroup, enabled: true, requires: &[CreateUnit] },
            StepSpec { kind: CreateCells, enabled: true, requires: &[CreateCellGroup] },
            StepSpec { kind: CreateItem, enabled: true, requires: &[CreateOrganization] },
            StepSpec { kind: CreateVariant, enabled: true, requires: &[CreateItem] },
            StepSpec {
                kind: CreateInstance,
                enabled: cfg.create_instances,
                requires: &[CreateVariant, CreateCells],
            },
            StepSpec {
                kind: CreateTask,
                enabled: cfg.create_tasks,
                requires: &[CreateInstance],
            },
            StepSpec {
                kind: UpdateEntities,
                enabled: cfg.update_entities,
                requires: &[CreateVariant, CreateCells],
            },
            StepSpec { kind: ListReads, enabled: true, requires: &[CreateVariant] },
        ];
        Self { steps }
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    /// Steps that will actually run: enabled, with every prerequisite
    /// effective too. Dependencies always precede dependents in the list,
    /// so one forward pass settles the closure.
    pub fn effective(&self) -> HashSet<StepKind> {
        let mut effective = HashSet::new();
        for step in &self.steps {
            if step.enabled && step.requires.iter().all(|req| effective.contains(req)) {
                effective.insert(step.kind);
            }
        }
        effective
    }
}

/// How one iteration ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Completed,
    /// A create guard saw a non-success status; the dependent chain was
    /// abandoned. Partial iterations are an accepted outcome under load.
    EarlyExit { after: StepKind },
}

#[derive(Debug, Error)]
pub enum IterationError {
    #[error("authentication request failed")]
    Auth(#[source] RetryExhausted),
    #[error("{step} request failed")]
    Request {
        step: StepKind,
        #[source]
        source: RetryExhausted,
    },
    #[error("{step} returned a malformed response")]
    Response {
        step: StepKind,
        #[source]
        source: ResponseError,
    },
    #[error("task creation rejected with status {status}: {body}")]
    TaskRejected { status: u16, body: String },
}

/// The seam the load runner drives. One implementation per journey shape.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Scenario: Send + Sync {
    async fn run_iteration(&self, vu: u32) -> Result<IterationOutcome, IterationError>;

    /// Randomized pause before the virtual user's next iteration.
    fn think_time(&self) -> Duration;
}

pub struct WarehouseScenario {
    client: Arc<ApiClient>,
    sessions: SessionManager,
    users: &'static UserPool,
    effective_steps: HashSet<StepKind>,
    think_time_seconds: RangeInclusive<u64>,
}

impl WarehouseScenario {
    pub fn new(
        client: Arc<ApiClient>,
        sessions: SessionManager,
        users: &'static UserPool,
        plan: ScenarioPlan,
        think_time_seconds: RangeInclusive<u64>,
    ) -> Self {
        let effective_steps = plan.effective();
        for step in plan.steps() {
            if step.enabled && !effective_steps.contains(&step.kind) {
                warn!(step = %step.kind, "step disabled because a prerequisite is disabled");
            }
        }
        Self {
            client,
            sessions,
            users,
            effective_steps,
            think_time_seconds,
        }
    }

    fn step_enabled(&self, kind: StepKind) -> bool {
        self.effective_steps.contains(&kind)
    }

    async fn post_step(
        &self,
        step: StepKind,
        path: &str,
        body: Value,
        ctx: &RequestContext,
    ) -> Result<ApiResponse, IterationError> {
        self.client
            .post(path, body, ctx)
            .await
            .map_err(|source| IterationError::Request { step, source })
    }

    async fn put_step(
        &self,
        step: StepKind,
        path: &str,
        body: Value,
        ctx: &RequestContext,
    ) -> Result<ApiResponse, IterationError> {
        self.client
            .put(path, body, ctx)
            .await
            .map_err(|source| IterationError::Request { step, source })
    }

    async fn get_step(
        &self,
        step: StepKind,
        path: &str,
        ctx: &RequestContext,
    ) -> Result<ApiResponse, IterationError> {
        self.client
            .get(path, ctx)
            .await
            .map_err(|source| IterationError::Request { step, source })
    }

    fn parse_id(&self, step: StepKind, response: &ApiResponse) -> Result<String, IterationError> {
        response
            .data_id()
            .map_err(|source| IterationError::Response { step, source })
    }
}

#[async_trait]
impl Scenario for WarehouseScenario {
    async fn run_iteration(&self, vu: u32) -> Result<IterationOutcome, IterationError> {
        use StepKind::*;

        let user = self.users.pick();
        debug!(vu, email = %user.email, "starting iteration");

        // An empty token is not an error here; unauthenticated requests are
        // rejected by the API and surface through the create guards below.
        let token = self
            .sessions
            .authenticate(user)
            .await
            .map_err(IterationError::Auth)?;
        let base_ctx = auth_headers(&token, None);

        let org_res = self
            .post_step(CreateOrganization, "/orgs", org_payload(), &base_ctx)
            .await?;
        if !org_res.is_success() {
            return Ok(IterationOutcome::EarlyExit { after: CreateOrganization });
        }
        let org_id = self.parse_id(CreateOrganization, &org_res)?;

        // Unit-scoped operations carry the new organization id.
        let ctx = auth_headers(&token, Some(&org_id));

        let unit_res = self
            .post_step(CreateUnit, "/units", unit_payload(), &ctx)
            .await?;
        if !unit_res.is_success() {
            return Ok(IterationOutcome::EarlyExit { after: CreateUnit });
        }
        let unit_id = self.parse_id(CreateUnit, &unit_res)?;

        self.post_step(
            CreateStorageGroup,
            "/storage-groups",
            storage_group_payload(&unit_id),
            &ctx,
        )
        .await?;

        let cell_group_res = self
            .post_step(CreateCellGroup, "/cells-groups", cell_group_payload(&unit_id), &ctx)
            .await?;
        let cell_group_id = self.parse_id(CreateCellGroup, &cell_group_res)?;

        let cells_path = format!("/cells-groups/{cell_group_id}/cells");
        let source_cell = CellPayload::random();
        let source_cell_res = self
            .post_step(CreateCells, &cells_path, source_cell.to_json(), &ctx)
            .await?;
        let source_cell_id = self.parse_id(CreateCells, &source_cell_res)?;
        let target_cell = CellPayload::random();
        let target_cell_res = self
            .post_step(CreateCells, &cells_path, target_cell.to_json(), &ctx)
            .await?;
        let target_cell_id = self.parse_id(CreateCells, &target_cell_res)?;

        let item_res = self.post_step(CreateItem, "/items", item_payload(), &ctx).await?;
        let item_id = self.parse_id(CreateItem, &item_res)?;

        let variants_path = format!("/items/{item_id}/variants");
        let variant_res = self
            .post_step(CreateVariant, &variants_path, variant_payload(), &ctx)
            .await?;
        let variant_id = self.parse_id(CreateVariant, &variant_res)?;

        let mut instance_id = None;
        if self.step_enabled(CreateInstance) {
            let instances_path = format!("/items/{item_id}/instances");
            let res = self
                .post_step(
                    CreateInstance,
                    &instances_path,
                    json!({ "variantId": variant_id, "cellId": source_cell_id }),
                    &ctx,
                )
                .await?;
            instance_id = Some(self.parse_id(CreateInstance, &res)?);
        }

        if self.step_enabled(CreateTask) {
            // The plan's dependency closure guarantees an instance id here.
            if let Some(instance_id) = &instance_id {
                let res = self
                    .post_step(
                        CreateTask,
                        "/tasks",
                        task_payload(&unit_id, instance_id, &target_cell_id),
                        &ctx,
                    )
                    .await?;
                if res.status.as_u16() != 200 {
                    return Err(IterationError::TaskRejected {
                        status: res.status.as_u16(),
                        body: res.body,
                    });
                }
            }
        }

        if self.step_enabled(UpdateEntities) {
            self.put_step(UpdateEntities, &format!("/items/{item_id}"), item_update_payload(), &ctx)
                .await?;
            self.put_step(
                UpdateEntities,
                &format!("/items/{item_id}/variants/{variant_id}"),
                variant_update_payload(),
                &ctx,
            )
            .await?;
            self.put_step(
                UpdateEntities,
                &format!("/cells-groups/{cell_group_id}/cells/{source_cell_id}"),
                source_cell.update_json(),
                &ctx,
            )
            .await?;
        }

        // Read traffic alongside the writes: the fixed list battery.
        for path in read_paths(&item_id) {
            self.get_step(ListReads, &path, &ctx).await?;
        }

        Ok(IterationOutcome::Completed)
    }

    fn think_time(&self) -> Duration {
        let seconds = rand::thread_rng().gen_range(self.think_time_seconds.clone());
        Duration::from_secs(seconds)
    }
}

/// The seven read-only list calls issued after the creates, in order.
fn read_paths(item_id: &str) -> [String; 7] {
    [
        "/orgs".to_string(),
        "/units".to_string(),
        "/storage-groups".to_string(),
        "/items".to_string(),
        "/tasks".to_string(),
        "/cells-groups".to_string(),
        format!("/items/{item_id}/variants"),
    ]
}

#[derive(Debug, Clone)]
struct CellPayload {
    alias: String,
    row: u32,
    level: u32,
    position: u32,
}

impl CellPayload {
    /// Randomized coordinates within a small warehouse topology; collisions
    /// are acceptable for load generation.
    fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            alias: format!("C{}", random_suffix(3)),
            row: rng.gen_range(1..=5),
            level: rng.gen_range(1..=3),
            position: rng.gen_range(1..=10),
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "alias": self.alias,
            "row": self.row,
            "level": self.level,
            "position": self.position,
        })
    }

    /// Update payload keeps the original coordinates, new alias.
    fn update_json(&self) -> Value {
        json!({
            "alias": format!("UC{}", random_suffix(3)),
            "row": self.row,
            "level": self.level,
            "position": self.position,
        })
    }
}

fn random_suffix(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), len)
}

fn random_digits(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| char::from(b'0' + rng.gen_range(0u8..10))).collect()
}

fn org_payload() -> Value {
    let name = format!("TestOrg{}", random_suffix(8));
    json!({ "name": name, "subdomain": name.to_lowercase() })
}

fn unit_payload() -> Value {
    json!({
        "name": format!("Warehouse{}", random_suffix(6)),
        "alias": format!("WH{}", random_suffix(3)),
        "address": format!("Test Address {}", random_suffix(10)),
    })
}

fn storage_group_payload(unit_id: &str) -> Value {
    json!({
        "name": format!("Storage{}", random_suffix(6)),
        "alias": format!("ST{}", random_suffix(3)),
        "unitId": unit_id,
    })
}

fn cell_group_payload(unit_id: &str) -> Value {
    json!({
        "name": format!("CellGroup{}", random_suffix(6)),
        "alias": format!("CG{}", random_suffix(3)),
        "unitId": unit_id,
    })
}

fn item_payload() -> Value {
    json!({
        "name": format!("Item{}", random_suffix(6)),
        "description": format!("Test item description {}", random_suffix(20)),
    })
}

fn item_update_payload() -> Value {
    json!({
        "name": format!("UpdatedItem{}", random_suffix(6)),
        "description": format!("Updated description {}", random_suffix(20)),
    })
}

fn variant_payload() -> Value {
    json!({
        "name": format!("Variant{}", random_suffix(6)),
        "article": random_digits(12),
    })
}

fn variant_update_payload() -> Value {
    json!({
        "name": format!("UpdatedVariant{}", random_suffix(6)),
        "article": random_digits(12),
    })
}

fn task_payload(unit_id: &str, instance_id: &str, target_cell_id: &str) -> Value {
    json!({
        "name": format!("Task{}", random_suffix(6)),
        "description": format!("Test task description {}", random_suffix(20)),
        "type": "movement",
        "unitId": unit_id,
        "items": [{
            "instanceId": instance_id,
            "targetCellId": target_cell_id,
        }],
    })
}
