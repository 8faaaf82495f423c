//! The top-level tick loop.
//!
//! Every tick: reload sessions whose daily reload time just passed,
//! authenticate every session concurrently, then run the acquisition pipeline
//! for each authenticated session concurrently, highest priority first.
//!
//! Each session's work runs in its own spawned task, so a failure or panic in
//! one session is recorded as that session's outcome and never takes its
//! siblings down with it.

use std::cmp::Reverse;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::OpportunityApi;
use crate::auth::Session;
use crate::pipeline::{self, CycleOutcome, PipelineError};
use crate::registry::SessionRegistry;

/// Pause between ticks
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 3;

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub tick_interval: Duration,
    /// Let logins show the browser
    pub interactive: bool,
    /// Only ever work on this username
    pub single_user: Option<String>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS),
            interactive: false,
            single_user: None,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub reloaded: usize,
    pub sessions: usize,
    pub authenticated: usize,
    pub cycles_completed: usize,
    pub windows_closed: usize,
    /// Pipeline errors and panicked tasks
    pub cycles_failed: usize,
    pub claimed: usize,
}

pub struct Scheduler {
    registry: Arc<Mutex<SessionRegistry>>,
    api: Arc<dyn OpportunityApi>,
    options: SchedulerOptions,
    /// `None` until the first tick; reload times are only checked from then on
    last_reload_check: Option<DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Mutex<SessionRegistry>>,
        api: Arc<dyn OpportunityApi>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            registry,
            api,
            options,
            last_reload_check: None,
        }
    }

    fn selected(&self, session: &Session) -> bool {
        self.options
            .single_user
            .as_deref()
            .map_or(true, |user| user == session.username())
    }

    /// Reload what is due, then snapshot the sessions to work on. The
    /// registry lock is released before any network I/O.
    async fn prepare_sessions(&mut self, now: DateTime<Utc>, summary: &mut TickSummary) -> Vec<Arc<Session>> {
        let mut registry = self.registry.lock().await;

        if let Some(last_check) = self.last_reload_check {
            let due: Vec<Arc<Session>> = registry
                .sessions()
                .into_iter()
                .filter(|s| self.selected(s) && SessionRegistry::due_for_reload(s, last_check, now))
                .collect();
            for session in due {
                info!(username = %session.username(), "Reload time reached, reloading session");
                if registry.reload(&session).is_some() {
                    summary.reloaded += 1;
                }
            }
        }

        let sessions: Vec<Arc<Session>> = registry
            .sessions()
            .into_iter()
            .filter(|s| self.selected(s))
            .collect();
        drop(registry);

        self.last_reload_check = Some(now);
        sessions
    }

    async fn authenticate_all(&self, sessions: Vec<Arc<Session>>) -> Vec<Arc<Session>> {
        let interactive = self.options.interactive;
        let tasks = sessions.into_iter().map(|session| {
            let username = session.username().to_string();
            let handle = tokio::spawn(async move {
                let ok = session.authenticate(interactive).await;
                (session, ok)
            });
            handle.map(move |result| (username, result))
        });

        let mut authenticated = Vec::new();
        for (username, result) in join_all(tasks).await {
            match result {
                Ok((session, true)) => {
                    debug!(username = %username, "Authenticated session");
                    authenticated.push(session);
                }
                Ok((_, false)) => error!(username = %username, "Failed to authenticate session"),
                Err(e) => error!(username = %username, error = %e, "Authentication task failed"),
            }
        }
        authenticated
    }

    /// Run one tick starting at `now`.
    ///
    /// `now` drives the reload check. Each cycle sees `now` advanced by the
    /// time the tick has spent so far, so a login that outlasts the pick
    /// window keeps its cycle from starting.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickSummary {
        let started = Instant::now();
        let mut summary = TickSummary::default();

        let sessions = self.prepare_sessions(now, &mut summary).await;
        summary.sessions = sessions.len();

        let mut authenticated = self.authenticate_all(sessions).await;
        summary.authenticated = authenticated.len();

        // Submission order only; the cycles still run concurrently
        authenticated.sort_by_key(|s| Reverse(s.priority()));

        let tasks = authenticated.into_iter().map(|session| {
            let api = self.api.clone();
            let username = session.username().to_string();
            let handle = tokio::spawn(async move {
                let cycle_now = now + TimeDelta::from_std(started.elapsed()).unwrap_or(TimeDelta::zero());
                pipeline::run(&session, api.as_ref(), cycle_now).await
            });
            handle.map(move |result| (username, result))
        });

        for (username, result) in join_all(tasks).await {
            match result {
                Ok(Ok(CycleOutcome::Completed(report))) => {
                    summary.cycles_completed += 1;
                    summary.claimed += report.claimed;
                    if report.matched > 0 {
                        info!(username = %username, ?report, "Pick cycle finished");
                    } else {
                        debug!(username = %username, ?report, "Pick cycle finished");
                    }
                }
                Ok(Ok(CycleOutcome::WindowClosed)) => summary.windows_closed += 1,
                Ok(Err(PipelineError::EmployeeIdUnavailable)) => {
                    summary.cycles_failed += 1;
                    warn!(username = %username, "Employee id not ready, retrying next tick");
                }
                Ok(Err(e)) => {
                    summary.cycles_failed += 1;
                    error!(username = %username, error = %e, "Pick cycle failed");
                }
                Err(e) => {
                    summary.cycles_failed += 1;
                    error!(username = %username, error = %e, "Pick cycle task failed");
                }
            }
        }

        summary
    }

    /// Tick until `shutdown` is cancelled. A tick that panics is logged and
    /// the loop carries on.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.options.tick_interval.as_millis() as u64,
            single_user = ?self.options.single_user,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.options.tick_interval) => {}
            }

            let now = Utc::now();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = AssertUnwindSafe(self.tick(now)).catch_unwind() => match result {
                    Ok(summary) => debug!(?summary, "Tick finished"),
                    Err(_) => error!("Tick panicked, continuing with next tick"),
                },
            }
        }

        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Endpoints, FakeOpportunityApi};
    use crate::auth::{CookieSet, FakeLoginFlow, LoginError, LoginFlow};
    use crate::models::{ShiftOpportunity, UserConfig};
    use crate::testing::{opportunity, user_config, utc, FakeConfigSource};
    use async_trait::async_trait;
    use chrono::NaiveTime;
    use std::path::PathBuf;

    /// Logs everyone in except `broken`.
    struct SelectiveLogin {
        broken: &'static str,
    }

    #[async_trait]
    impl LoginFlow for SelectiveLogin {
        async fn perform_login(&self, config: &UserConfig, _interactive: bool) -> Result<CookieSet, LoginError> {
            if config.username() == self.broken {
                return Err(LoginError::Rejected("bad password".to_string()));
            }
            Ok(FakeLoginFlow::valid_cookies(86_400))
        }
    }

    /// Panics when asked for `doomed`'s shifts.
    struct PanickingApi {
        inner: FakeOpportunityApi,
        doomed: &'static str,
    }

    #[async_trait]
    impl OpportunityApi for PanickingApi {
        async fn fetch_opportunities(
            &self,
            session: &Session,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Vec<ShiftOpportunity> {
            if session.username() == self.doomed {
                panic!("malformed payload for {}", self.doomed);
            }
            self.inner.fetch_opportunities(session, start, end).await
        }

        async fn claim_opportunity(&self, session: &Session, opportunity_id: &str) -> bool {
            self.inner.claim_opportunity(session, opportunity_id).await
        }
    }

    fn shifts() -> Vec<ShiftOpportunity> {
        vec![opportunity("opp-1", "2026-10-20T08:00:00Z", "2026-10-20T16:00:00Z")]
    }

    fn registry_with(login: Arc<dyn LoginFlow>, source: &FakeConfigSource) -> SessionRegistry {
        SessionRegistry::new(
            Arc::new(source.clone()),
            login,
            Arc::new(Endpoints::single("http://127.0.0.1:9")),
        )
    }

    fn scheduler(registry: SessionRegistry, api: Arc<dyn OpportunityApi>, options: SchedulerOptions) -> Scheduler {
        Scheduler::new(Arc::new(Mutex::new(registry)), api, options)
    }

    #[tokio::test]
    async fn test_tick_claims_for_every_authenticated_session() {
        let mut registry = registry_with(Arc::new(FakeLoginFlow::succeeding()), &FakeConfigSource::new());
        let mut high = user_config("high");
        high.credential.priority = 5;
        registry.create(high, None).expect("create should succeed");
        registry.create(user_config("low"), None).expect("create should succeed");

        let api = FakeOpportunityApi::new(shifts());
        let mut scheduler = scheduler(registry, Arc::new(api.clone()), SchedulerOptions::default());

        let summary = scheduler.tick(utc("2026-10-16T12:00:00Z")).await;

        assert_eq!(summary.sessions, 2);
        assert_eq!(summary.authenticated, 2);
        assert_eq!(summary.cycles_completed, 2);
        assert_eq!(summary.claimed, 2);
        let mut users: Vec<String> = api.claims().into_iter().map(|(user, _)| user).collect();
        users.sort();
        assert_eq!(users, vec!["high".to_string(), "low".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_login_is_isolated() {
        let login = Arc::new(SelectiveLogin { broken: "broken" });
        let mut registry = registry_with(login, &FakeConfigSource::new());
        registry.create(user_config("broken"), None).expect("create should succeed");
        registry.create(user_config("fine"), None).expect("create should succeed");

        let api = FakeOpportunityApi::new(shifts());
        let mut scheduler = scheduler(registry, Arc::new(api.clone()), SchedulerOptions::default());

        let summary = scheduler.tick(utc("2026-10-16T12:00:00Z")).await;

        assert_eq!(summary.sessions, 2);
        assert_eq!(summary.authenticated, 1);
        assert_eq!(api.claims(), vec![("fine".to_string(), "opp-1".to_string())]);
    }

    #[tokio::test]
    async fn test_panicking_cycle_is_isolated() {
        let mut registry = registry_with(Arc::new(FakeLoginFlow::succeeding()), &FakeConfigSource::new());
        registry.create(user_config("doomed"), None).expect("create should succeed");
        registry.create(user_config("fine"), None).expect("create should succeed");

        let inner = FakeOpportunityApi::new(shifts());
        let api = PanickingApi {
            inner: inner.clone(),
            doomed: "doomed",
        };
        let mut scheduler = scheduler(registry, Arc::new(api), SchedulerOptions::default());

        let summary = scheduler.tick(utc("2026-10-16T12:00:00Z")).await;

        assert_eq!(summary.cycles_failed, 1);
        assert_eq!(summary.cycles_completed, 1);
        assert_eq!(inner.claims(), vec![("fine".to_string(), "opp-1".to_string())]);
    }

    #[tokio::test]
    async fn test_single_user_restricts_tick() {
        let login = FakeLoginFlow::succeeding();
        let mut registry = registry_with(Arc::new(login.clone()), &FakeConfigSource::new());
        registry.create(user_config("jdoe"), None).expect("create should succeed");
        registry.create(user_config("asmith"), None).expect("create should succeed");

        let api = FakeOpportunityApi::new(shifts());
        let options = SchedulerOptions {
            single_user: Some("jdoe".to_string()),
            ..SchedulerOptions::default()
        };
        let mut scheduler = scheduler(registry, Arc::new(api.clone()), options);

        let summary = scheduler.tick(utc("2026-10-16T12:00:00Z")).await;

        assert_eq!(summary.sessions, 1);
        assert_eq!(login.calls().len(), 1);
        assert_eq!(login.calls()[0].username, "jdoe");
        assert_eq!(api.claims(), vec![("jdoe".to_string(), "opp-1".to_string())]);
    }

    #[tokio::test]
    async fn test_reload_when_trigger_passes() {
        let source = FakeConfigSource::new();
        let path = PathBuf::from("/cfg/jdoe.toml");
        let mut config = user_config("jdoe");
        config.pick_window.reload_session_on = NaiveTime::from_hms_opt(4, 0, 0);
        source.insert(path.clone(), config.clone());

        let login = FakeLoginFlow::succeeding();
        let mut registry = registry_with(Arc::new(login.clone()), &source);
        registry.create(config, Some(path.clone())).expect("create should succeed");

        let api = FakeOpportunityApi::new(vec![]);
        let mut scheduler = scheduler(registry, Arc::new(api), SchedulerOptions::default());

        let first = scheduler.tick(utc("2026-10-16T03:59:58Z")).await;
        assert_eq!(first.reloaded, 0);
        let second = scheduler.tick(utc("2026-10-16T04:00:01Z")).await;
        assert_eq!(second.reloaded, 1);
        let third = scheduler.tick(utc("2026-10-16T04:00:04Z")).await;
        assert_eq!(third.reloaded, 0);

        assert_eq!(source.loads(), vec![path]);
        // The rebuilt session starts unauthenticated and logs in again
        assert_eq!(login.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_reload_drops_session() {
        let source = FakeConfigSource::new();
        let mut config = user_config("jdoe");
        config.pick_window.reload_session_on = NaiveTime::from_hms_opt(4, 0, 0);

        let mut registry = registry_with(Arc::new(FakeLoginFlow::succeeding()), &source);
        registry
            .create(config, Some(PathBuf::from("/cfg/jdoe.toml")))
            .expect("create should succeed");
        let registry = Arc::new(Mutex::new(registry));

        let api = FakeOpportunityApi::new(vec![]);
        let mut scheduler = Scheduler::new(registry.clone(), Arc::new(api), SchedulerOptions::default());

        scheduler.tick(utc("2026-10-16T03:59:58Z")).await;
        let summary = scheduler.tick(utc("2026-10-16T04:00:01Z")).await;

        assert_eq!(summary.sessions, 0);
        assert!(registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_window_closing_during_login_blocks_cycle() {
        let login = FakeLoginFlow::succeeding().with_delay(Duration::from_millis(400));
        let mut registry = registry_with(Arc::new(login), &FakeConfigSource::new());
        let mut config = user_config("jdoe");
        config.pick_window.time_to_pick = Some(utc("2026-10-16T11:00:00Z"));
        config.pick_window.duration = TimeDelta::hours(1);
        registry.create(config, None).expect("create should succeed");

        let api = FakeOpportunityApi::new(shifts());
        let mut scheduler = scheduler(registry, Arc::new(api.clone()), SchedulerOptions::default());

        // Open when the tick starts, closed by the time the login finishes
        let summary = scheduler.tick(utc("2026-10-16T11:59:59.800Z")).await;

        assert_eq!(summary.authenticated, 1);
        assert_eq!(summary.windows_closed, 1);
        assert_eq!(summary.cycles_completed, 0);
        assert!(api.fetches().is_empty());
        assert!(api.claims().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let registry = registry_with(Arc::new(FakeLoginFlow::succeeding()), &FakeConfigSource::new());
        let options = SchedulerOptions {
            tick_interval: Duration::from_millis(10),
            ..SchedulerOptions::default()
        };
        let scheduler = scheduler(registry, Arc::new(FakeOpportunityApi::new(vec![])), options);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler should stop promptly")
            .expect("scheduler task should not panic");
    }
}
