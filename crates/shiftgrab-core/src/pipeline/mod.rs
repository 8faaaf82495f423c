//! One shift acquisition cycle for one session.
//!
//! The cycle: check the pick window, derive the query horizon from the rule
//! intervals, fetch every ≤7-day chunk concurrently, keep the available
//! opportunities, dedupe them by id, keep those that fit inside a rule, and
//! claim all of those concurrently.
//!
//! Fetches and claims absorb their own failures (see `OpportunityApi`), so a
//! bad chunk or a rejected claim never discards its siblings' results.

pub mod horizon;
pub mod matching;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info};

use crate::api::OpportunityApi;
use crate::auth::Session;
use crate::config::ConfigError;

pub use horizon::{Horizon, MAX_CHUNK_DAYS};
pub use matching::{is_candidate, merge, within_rules};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid pick configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Employee id not available yet")]
    EmployeeIdUnavailable,
}

/// Counts from one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Time chunks queried
    pub chunks: usize,
    /// Opportunities returned across all chunks, duplicates included
    pub fetched: usize,
    /// Distinct opportunities left after filtering and dedupe
    pub candidates: usize,
    /// Candidates lying inside a rule interval
    pub matched: usize,
    /// Claims confirmed by the API
    pub claimed: usize,
    /// Claims that failed or were not confirmed
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The pick window is not open; nothing was attempted
    WindowClosed,
    Completed(CycleReport),
}

/// Run one acquisition cycle for `session` at `now`.
///
/// The window is checked once, up front. Claims already dispatched run to
/// completion even if the window closes while they are in flight.
pub async fn run(
    session: &Session,
    api: &dyn OpportunityApi,
    now: DateTime<Utc>,
) -> Result<CycleOutcome, PipelineError> {
    let config = session.config();
    let window = &config.pick_window;

    if !window.is_open(now) {
        debug!(username = %session.username(), "Not time to pick shift yet");
        return Ok(CycleOutcome::WindowClosed);
    }

    let horizon = Horizon::from_rules(&window.rules)?;
    let chunks = horizon.chunks();

    if !api.prepare(session).await {
        return Err(PipelineError::EmployeeIdUnavailable);
    }

    debug!(
        username = %session.username(),
        start = %horizon.start,
        end = %horizon.end,
        chunks = chunks.len(),
        "Running pick shift"
    );

    let fetches = chunks
        .iter()
        .map(|&(start, end)| api.fetch_opportunities(session, start, end));
    let batches = join_all(fetches).await;

    let fetched = batches.iter().map(Vec::len).sum();
    let candidates = merge(
        batches
            .into_iter()
            .flatten()
            .filter(|o| is_candidate(o, &config.credential)),
    );

    let matches: Vec<_> = candidates
        .iter()
        .filter(|o| within_rules(o, &window.rules))
        .collect();
    for opportunity in &matches {
        info!(username = %session.username(), opportunity = %opportunity, "Picking shift");
    }

    let claims = matches
        .iter()
        .map(|o| api.claim_opportunity(session, &o.id));
    let results = join_all(claims).await;
    let claimed = results.iter().filter(|&&ok| ok).count();

    let report = CycleReport {
        chunks: chunks.len(),
        fetched,
        candidates: candidates.len(),
        matched: matches.len(),
        claimed,
        failed: results.len() - claimed,
    };
    Ok(CycleOutcome::Completed(report))
}
