//! Fake login flow for testing

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::models::UserConfig;

use super::context::{
    Cookie, CookieSet, ACCESS_TOKEN_COOKIE, EXPIRATION_COOKIE, REFRESH_TOKEN_COOKIE, SESSION_MARKER_COOKIE,
};
use super::{LoginError, LoginFlow};

/// Recorded login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCall {
    pub username: String,
    pub interactive: bool,
}

enum Outcome {
    Cookies(CookieSet),
    Fail,
}

/// Hands out a fixed cookie set (or a failure) and records every call.
#[derive(Clone)]
pub struct FakeLoginFlow {
    outcome: Arc<Outcome>,
    delay: Duration,
    calls: Arc<Mutex<Vec<LoginCall>>>,
}

impl FakeLoginFlow {
    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            outcome: Arc::new(outcome),
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Logins yield all trust artifacts with an expiry a day out.
    pub fn succeeding() -> Self {
        Self::with_cookies(Self::valid_cookies(86_400))
    }

    pub fn with_cookies(cookies: CookieSet) -> Self {
        Self::with_outcome(Outcome::Cookies(cookies))
    }

    pub fn failing() -> Self {
        Self::with_outcome(Outcome::Fail)
    }

    /// Hold every login for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Trust artifacts plus an expiration claim `expires_in_secs` from now.
    pub fn valid_cookies(expires_in_secs: i64) -> CookieSet {
        vec![
            Cookie::new(ACCESS_TOKEN_COOKIE, "access-token"),
            Cookie::new(REFRESH_TOKEN_COOKIE, "refresh-token"),
            Cookie::new(SESSION_MARKER_COOKIE, "session-marker"),
            Cookie::new(
                EXPIRATION_COOKIE,
                (Utc::now().timestamp() + expires_in_secs).to_string(),
            ),
        ]
    }

    pub fn calls(&self) -> Vec<LoginCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl LoginFlow for FakeLoginFlow {
    async fn perform_login(&self, config: &UserConfig, interactive: bool) -> Result<CookieSet, LoginError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(LoginCall {
                username: config.username().to_string(),
                interactive,
            });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.outcome.as_ref() {
            Outcome::Cookies(cookies) if cookies.is_empty() => Err(LoginError::NoCookies),
            Outcome::Cookies(cookies) => Ok(cookies.clone()),
            Outcome::Fail => Err(LoginError::Rejected("fake login failure".to_string())),
        }
    }
}
