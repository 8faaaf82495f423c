use thiserror::Error;

use crate::models::TwoFactorKind;

/// Failures of the login collaborator. All of them leave the session
/// unauthenticated until the next tick tries again.
#[derive(Error, Debug)]
pub enum LoginError {
    #[error("Failed to run login helper: {0}")]
    Io(#[from] std::io::Error),

    #[error("Login helper exited with {0}")]
    HelperFailed(std::process::ExitStatus),

    #[error("Login helper timed out after {0}s")]
    Timeout(u64),

    #[error("Login helper produced invalid output: {0}")]
    InvalidOutput(String),

    #[error("No cookies found after login")]
    NoCookies,

    #[error("Unsupported two-factor method: {0}")]
    UnsupportedTwoFactor(TwoFactorKind),

    #[error("No two-factor code available for {0}")]
    NoCode(String),

    #[error("Login rejected: {0}")]
    Rejected(String),

    #[error("Credentials changed while logging in, cookies discarded")]
    Superseded,

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failures of the token refresh round trip.
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Failed to get CSRF token: {status} - {body}")]
    Initialize { status: u16, body: String },

    #[error("CSRF token not found in response headers")]
    MissingCsrfToken,

    #[error("Failed to refresh access token: {status} - {body}")]
    Refresh { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Username cannot change on update: {current} -> {requested}")]
    UsernameChanged { current: String, requested: String },

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}
