//! Client module for the A to Z shift opportunity API.
//!
//! This module provides the `OpportunityApi` seam used by the acquisition
//! pipeline, and `ApiClient`, its GraphQL implementation. Requests ride on the
//! session's own HTTP context so the session cookies authenticate them.

pub mod client;
pub mod endpoints;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::Session;
use crate::models::ShiftOpportunity;

pub use client::ApiClient;
pub use endpoints::Endpoints;
pub use error::ApiError;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeOpportunityApi, FetchCall};

/// Fetch and claim shift opportunities on behalf of a session.
///
/// Both calls absorb their failures: a fetch that goes wrong yields an empty
/// list, a claim that goes wrong yields `false`. Either way the next tick
/// tries again.
#[async_trait]
pub trait OpportunityApi: Send + Sync {
    /// Resolve whatever per-session state the calls need before a cycle fans out.
    /// Returning `false` skips the cycle.
    async fn prepare(&self, session: &Session) -> bool {
        let _ = session;
        true
    }

    async fn fetch_opportunities(
        &self,
        session: &Session,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<ShiftOpportunity>;

    /// Claim one opportunity. Only an echo of the same id counts as success.
    async fn claim_opportunity(&self, session: &Session, opportunity_id: &str) -> bool;
}
