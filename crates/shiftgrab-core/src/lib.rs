//! Core library for shiftgrab.
//!
//! shiftgrab keeps authenticated sessions alive against the A to Z scheduling
//! API and claims open shifts that fall inside per-user rule intervals.
//!
//! - `auth`: per-user `Session` state machine plus the login and two-factor
//!   collaborators
//! - `registry`: the username → session store
//! - `api`: GraphQL client for fetching and claiming shift opportunities
//! - `pipeline`: one acquisition cycle for one session
//! - `scheduler`: the tick loop tying everything together

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod utils;

pub use api::{ApiClient, ApiError, Endpoints, OpportunityApi};
pub use auth::{AuthState, Session};
pub use config::{ConfigError, ConfigSource, TomlConfigSource};
pub use models::{Credential, PickWindowConfig, RuleInterval, ShiftOpportunity, UserConfig};
pub use registry::SessionRegistry;
pub use scheduler::{Scheduler, SchedulerOptions};
