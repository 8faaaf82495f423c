use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, RwLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::StatusCode;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, Endpoints};
use crate::models::{Credential, UserConfig};

use super::context::HttpContext;
use super::{LoginError, LoginFlow, RefreshError, SessionError};

/// Treat the session as expired this many seconds before the claim says so
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Request header asking the login host for a CSRF token
const CSRF_REQUEST_HEADER: &str = "anti-csrftoken-a2z-request";
/// Header carrying the CSRF token, both in the response and the refresh request
const CSRF_HEADER: &str = "anti-csrftoken-a2z";

static EMPLOYEE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"['"]employeeId['"]\s*:\s*['"](\d{9})['"]"#).expect("valid regex"));

/// Where a session stands with the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No trust artifacts and no failed attempt on record
    Unauthenticated,
    /// Trust artifacts present and the expiration claim is comfortably ahead
    Valid,
    /// Trust artifacts present but the claim is absent or within the margin
    Expired,
    /// No trust artifacts and the last login or refresh failed
    Failed,
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthState::Unauthenticated => write!(f, "unauthenticated"),
            AuthState::Valid => write!(f, "valid"),
            AuthState::Expired => write!(f, "expired"),
            AuthState::Failed => write!(f, "failed"),
        }
    }
}

/// Whether moving from `old` to `new` credentials voids the current login.
pub fn invalidates_auth(old: &Credential, new: &Credential) -> bool {
    old.password != new.password
        || old.two_factor.kind != new.two_factor.kind
        || old.two_factor.identifier != new.two_factor.identifier
}

/// Pull the 9-digit employee id out of an app page body.
pub fn parse_employee_id(body: &str) -> Option<u64> {
    EMPLOYEE_ID_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// One user's authenticated presence on the scheduling site.
///
/// Shared as `Arc<Session>` between the registry and in-flight tasks. Interior
/// state sits behind short-lived std locks that are never held across an
/// `.await`; the async `auth_gate` serializes authentication so concurrent
/// callers never log in twice.
pub struct Session {
    username: String,
    config: RwLock<Arc<UserConfig>>,
    context: RwLock<Arc<HttpContext>>,
    employee_id: Mutex<Option<u64>>,
    last_attempt_failed: AtomicBool,
    /// Bumped whenever a config update voids the credentials; only written
    /// while the context lock is held
    credential_generation: AtomicU64,
    auth_gate: tokio::sync::Mutex<()>,
    login_flow: Arc<dyn LoginFlow>,
    endpoints: Arc<Endpoints>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("state", &self.state())
            .field("employee_id", &self.cached_employee_id())
            .finish()
    }
}

impl Session {
    pub fn new(
        config: UserConfig,
        login_flow: Arc<dyn LoginFlow>,
        endpoints: Arc<Endpoints>,
    ) -> Result<Self, SessionError> {
        let context = HttpContext::empty(&endpoints)?;
        Ok(Self {
            username: config.username().to_string(),
            config: RwLock::new(Arc::new(config)),
            context: RwLock::new(Arc::new(context)),
            employee_id: Mutex::new(None),
            last_attempt_failed: AtomicBool::new(false),
            credential_generation: AtomicU64::new(0),
            auth_gate: tokio::sync::Mutex::new(()),
            login_flow,
            endpoints,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Snapshot of the current config.
    pub fn config(&self) -> Arc<UserConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn priority(&self) -> i32 {
        self.config().priority()
    }

    /// The current HTTP context. A caller holding it keeps using it even if
    /// the session swaps in a new one meanwhile.
    pub fn client(&self) -> Arc<HttpContext> {
        self.context.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn replace_context(&self, context: HttpContext) {
        *self.context.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(context);
    }

    /// Drop every trust artifact by swapping in an empty context.
    fn reset_context(&self) {
        match HttpContext::empty(&self.endpoints) {
            Ok(context) => self.replace_context(context),
            Err(e) => error!(username = %self.username, error = %e, "Failed to reset HTTP context"),
        }
    }

    fn cached_employee_id(&self) -> Option<u64> {
        *self.employee_id.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========================================================================
    // State
    // ========================================================================

    /// All three trust artifacts are present.
    pub fn is_valid(&self) -> bool {
        self.client().has_trust_artifacts()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expired when `now` plus the margin passes the expiration claim, or
    /// there is no usable claim.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.client().expiration_claim() {
            Some(claim) => now.timestamp() + EXPIRY_MARGIN_SECS > claim,
            None => true,
        }
    }

    pub fn state(&self) -> AuthState {
        if self.is_valid() {
            if self.is_expired() {
                AuthState::Expired
            } else {
                AuthState::Valid
            }
        } else if self.last_attempt_failed.load(Ordering::SeqCst) {
            AuthState::Failed
        } else {
            AuthState::Unauthenticated
        }
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// Make sure the session can make authenticated calls.
    ///
    /// Does nothing when already valid, refreshes when the tokens are merely
    /// expired, and otherwise runs a full login. Failures are logged and
    /// reported as `false`; the next tick tries again.
    pub async fn authenticate(&self, interactive: bool) -> bool {
        let _gate = self.auth_gate.lock().await;

        let authenticated = if self.is_valid() {
            if !self.is_expired() {
                return true;
            }
            debug!(username = %self.username, "Re-authenticating user session");
            match self.refresh().await {
                Ok(()) => {
                    info!(username = %self.username, "Session refreshed");
                    true
                }
                Err(e) => {
                    error!(username = %self.username, error = %e, "Failed to refresh session");
                    self.logout().await;
                    self.reset_context();
                    false
                }
            }
        } else {
            match self.login(interactive).await {
                Ok(()) => self.is_valid(),
                Err(e) => {
                    error!(username = %self.username, error = %e, "Failed to login");
                    false
                }
            }
        };

        self.last_attempt_failed.store(!authenticated, Ordering::SeqCst);
        if !authenticated {
            warn!(username = %self.username, "Failed to authenticate session");
        }
        authenticated
    }

    /// Renew the tokens: fetch a CSRF token, then post it to the refresh
    /// endpoint. The jar picks up the renewed cookies from the response.
    pub async fn refresh(&self) -> Result<(), RefreshError> {
        let context = self.client();

        let response = context
            .http()
            .get(self.endpoints.initialize_url())
            .header(CSRF_REQUEST_HEADER, "true")
            .send()
            .await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::Initialize {
                status: status.as_u16(),
                body: ApiError::truncate_body(&body),
            });
        }
        let csrf_token = response
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(RefreshError::MissingCsrfToken)?;

        let response = context
            .http()
            .post(self.endpoints.refresh_url())
            .header(CSRF_HEADER, csrf_token)
            .send()
            .await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::Refresh {
                status: status.as_u16(),
                body: ApiError::truncate_body(&body),
            });
        }
        Ok(())
    }

    /// Run a full login and install the resulting cookies as a fresh context.
    ///
    /// Cookies earned with credentials that a config update replaced while
    /// the login ran are discarded.
    pub async fn login(&self, interactive: bool) -> Result<(), LoginError> {
        let generation = self.credential_generation.load(Ordering::SeqCst);
        let config = self.config();
        let cookies = self.login_flow.perform_login(&config, interactive).await?;
        if cookies.is_empty() {
            return Err(LoginError::NoCookies);
        }
        let context = HttpContext::from_cookies(&cookies, &self.endpoints)?;

        let mut current = self.context.write().unwrap_or_else(|e| e.into_inner());
        if self.credential_generation.load(Ordering::SeqCst) != generation {
            return Err(LoginError::Superseded);
        }
        *current = Arc::new(context);
        drop(current);

        info!(username = %self.username, cookies = cookies.len(), "Logged in");
        Ok(())
    }

    /// Tell the login host to end the session. Best effort: failures are
    /// logged, never returned.
    pub async fn logout(&self) {
        let context = self.client();
        match context.http().get(self.endpoints.logout_url()).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                info!(username = %self.username, "Logged out user session");
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(
                    username = %self.username,
                    status = %status,
                    body = %ApiError::truncate_body(&body),
                    "Failed to logout"
                );
            }
            Err(e) => error!(username = %self.username, error = %e, "Failed to logout"),
        }
    }

    /// The account's employee id, resolved from the shifts page on first use.
    ///
    /// `None` means "not ready": the page could not be fetched or carried no
    /// id. Callers retry on a later tick.
    pub async fn employee_id(&self) -> Option<u64> {
        if let Some(id) = self.cached_employee_id() {
            return Some(id);
        }

        let context = self.client();
        let response = match context.http().get(self.endpoints.shifts_page_url()).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(username = %self.username, error = %e, "Failed to fetch shifts page");
                return None;
            }
        };
        if response.status() != StatusCode::OK {
            warn!(username = %self.username, status = %response.status(), "Failed to fetch shifts page");
            return None;
        }
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!(username = %self.username, error = %e, "Failed to read shifts page");
                return None;
            }
        };

        let Some(id) = parse_employee_id(&body) else {
            warn!(username = %self.username, "Employee id not found on shifts page");
            return None;
        };

        // An id resolved through a context that has since been replaced may
        // belong to credentials that no longer apply
        if Arc::ptr_eq(&context, &self.client()) {
            *self.employee_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
            debug!(username = %self.username, employee_id = id, "Employee id resolved");
        }
        Some(id)
    }

    // ========================================================================
    // Config updates
    // ========================================================================

    /// Apply a new config version.
    ///
    /// The username is the session's identity and cannot change. A change of
    /// password or two-factor method discards the HTTP context and the cached
    /// employee id; anything else is swapped in without touching auth.
    pub fn update_config(&self, new: UserConfig) -> Result<(), SessionError> {
        if new.username() != self.username {
            return Err(SessionError::UsernameChanged {
                current: self.username.clone(),
                requested: new.username().to_string(),
            });
        }

        let invalidates = invalidates_auth(&self.config().credential, &new.credential);
        if invalidates {
            let context = HttpContext::empty(&self.endpoints)?;
            *self.config.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(new);
            {
                let mut current = self.context.write().unwrap_or_else(|e| e.into_inner());
                self.credential_generation.fetch_add(1, Ordering::SeqCst);
                *current = Arc::new(context);
            }
            *self.employee_id.lock().unwrap_or_else(|e| e.into_inner()) = None;
            self.last_attempt_failed.store(false, Ordering::SeqCst);
            info!(username = %self.username, "Credentials changed, session reset");
        } else {
            *self.config.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(new);
            debug!(username = %self.username, "Session config updated");
        }
        Ok(())
    }
}
