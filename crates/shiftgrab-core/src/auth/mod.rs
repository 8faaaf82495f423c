//! Authentication module for keeping user sessions alive.
//!
//! This module provides:
//! - `Session`: the per-user auth state machine (login, refresh, logout,
//!   employee id resolution, config updates)
//! - `HttpContext`: the cookie-carrying HTTP client a session talks through
//! - `LoginFlow` / `CommandLogin`: the full-login collaborator
//! - `CodeProvider` / `OutlookCodeProvider`: one-time passcode retrieval
//!
//! A session is valid while its three trust cookies are present and expired
//! once the refresh claim is within 60 seconds.

pub mod context;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod login;
pub mod session;
pub mod two_factor;

pub use context::{Cookie, CookieSet, HttpContext};
pub use error::{LoginError, RefreshError, SessionError};
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeLoginFlow, LoginCall};
pub use login::{CommandLogin, LoginFlow};
pub use session::{invalidates_auth, parse_employee_id, AuthState, Session};
pub use two_factor::{CodeProvider, OutlookCodeProvider, TwoFactorProviders};
