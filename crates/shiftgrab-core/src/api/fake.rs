//! Fake opportunity API for testing

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::Session;
use crate::models::ShiftOpportunity;

use super::OpportunityApi;

/// Recorded fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub username: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Default)]
struct FakeState {
    opportunities: Vec<ShiftOpportunity>,
    rejected: HashSet<String>,
    not_ready: bool,
    fetches: Vec<FetchCall>,
    claims: Vec<(String, String)>,
}

/// In-memory `OpportunityApi`.
///
/// A fetch returns every stored opportunity whose start lies in the requested
/// range (inclusive), so overlapping chunks see the same shift twice. Claims
/// succeed unless the id was marked rejected.
#[derive(Clone, Default)]
pub struct FakeOpportunityApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeOpportunityApi {
    pub fn new(opportunities: Vec<ShiftOpportunity>) -> Self {
        let fake = Self::default();
        fake.lock().opportunities = opportunities;
        fake
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make claims of `id` come back unconfirmed.
    pub fn reject(&self, id: &str) {
        self.lock().rejected.insert(id.to_string());
    }

    /// Make `prepare` report the session as not ready.
    pub fn set_not_ready(&self, not_ready: bool) {
        self.lock().not_ready = not_ready;
    }

    pub fn fetches(&self) -> Vec<FetchCall> {
        self.lock().fetches.clone()
    }

    /// Claimed `(username, opportunity id)` pairs, in call order.
    pub fn claims(&self) -> Vec<(String, String)> {
        self.lock().claims.clone()
    }

    pub fn claimed_ids(&self) -> Vec<String> {
        self.lock().claims.iter().map(|(_, id)| id.clone()).collect()
    }
}

#[async_trait]
impl OpportunityApi for FakeOpportunityApi {
    async fn prepare(&self, _session: &Session) -> bool {
        !self.lock().not_ready
    }

    async fn fetch_opportunities(
        &self,
        session: &Session,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<ShiftOpportunity> {
        let mut state = self.lock();
        state.fetches.push(FetchCall {
            username: session.username().to_string(),
            start,
            end,
        });
        state
            .opportunities
            .iter()
            .filter(|o| o.start >= start && o.start <= end)
            .cloned()
            .collect()
    }

    async fn claim_opportunity(&self, session: &Session, opportunity_id: &str) -> bool {
        let mut state = self.lock();
        state
            .claims
            .push((session.username().to_string(), opportunity_id.to_string()));
        !state.rejected.contains(opportunity_id)
    }
}
