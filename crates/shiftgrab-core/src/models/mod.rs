//! Data models for users, pick windows and shift opportunities.
//!
//! - `UserConfig`: one user's credential plus pick window, as loaded from disk
//! - `Credential`, `TwoFactorMethod`, `Skill`: identity half of a config
//! - `PickWindowConfig`, `RuleInterval`: when and what to claim
//! - `ShiftOpportunity`: a claimable shift returned by the API

pub mod credential;
pub mod opportunity;
pub mod window;

pub use credential::{Credential, Skill, TwoFactorKind, TwoFactorMethod, UserConfig};
pub use opportunity::{OpportunityRaw, ShiftOpportunity};
pub use window::{PickWindowConfig, RuleInterval};
