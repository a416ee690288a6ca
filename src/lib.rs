//! storeit-loadgen - synthetic-user load generator for the storeit
//! warehouse management API.
//!
//! The crate drives concurrent virtual users through a representative
//! create/read journey (organization, unit, storage structures, catalog
//! entities), absorbing transient transport failures with bounded retry and
//! pacing iterations with randomized think-time. Latency and error-rate are
//! aggregated across all virtual users and judged against declarative
//! thresholds once the run completes.

pub mod client;
pub mod config;
pub mod metrics;
pub mod profile;
pub mod retry;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod telemetry;
pub mod users;
