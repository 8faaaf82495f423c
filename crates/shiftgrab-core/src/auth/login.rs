//! The interactive login collaborator.
//!
//! A full login drives the identity provider's web pages, which needs a real
//! browser. `CommandLogin` delegates that to an external helper program and
//! speaks a small line protocol with it:
//!
//! - credentials arrive in `SHIFTGRAB_*` environment variables
//! - a `NEED_CODE` line on stdout asks for the one-time passcode, answered
//!   with one line on stdin
//! - the final stdout line is the JSON cookie list
//!   (`[{"name": .., "value": .., "domain": .., "path": .., "expiry": ..}]`)

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::models::UserConfig;

use super::context::CookieSet;
use super::two_factor::{obfuscate_identifier, TwoFactorProviders};
use super::LoginError;

/// Line the helper prints when it is ready for the passcode
const NEED_CODE_LINE: &str = "NEED_CODE";

/// Upper bound on one login, passcode wait included
const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 180;

/// Performs a full login and hands back the resulting cookies.
///
/// Implementations release whatever they acquired (browser, child process)
/// on every exit path.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    async fn perform_login(&self, config: &UserConfig, interactive: bool) -> Result<CookieSet, LoginError>;
}

/// Runs a browser-automation helper as a child process.
pub struct CommandLogin {
    program: PathBuf,
    args: Vec<String>,
    two_factor: TwoFactorProviders,
    timeout: Duration,
}

impl CommandLogin {
    pub fn new(program: impl Into<PathBuf>, two_factor: TwoFactorProviders) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            two_factor,
            timeout: Duration::from_secs(DEFAULT_LOGIN_TIMEOUT_SECS),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_helper(&self, config: &UserConfig, interactive: bool) -> Result<CookieSet, LoginError> {
        let credential = &config.credential;

        // kill_on_drop reaps the helper on timeout and on every early return
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("SHIFTGRAB_USERNAME", &credential.username)
            .env("SHIFTGRAB_PASSWORD", &credential.password)
            .env("SHIFTGRAB_TWO_FACTOR_LABEL", obfuscate_identifier(&credential.two_factor))
            .env("SHIFTGRAB_SHOW_BROWSER", if interactive { "1" } else { "0" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| LoginError::InvalidOutput("helper stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LoginError::InvalidOutput("helper stdout unavailable".to_string()))?;

        let mut lines = BufReader::new(stdout).lines();
        let mut last_line = None;
        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line == NEED_CODE_LINE {
                debug!(username = %credential.username, "Login helper requested a passcode");
                let code = self.two_factor.code_for(&credential.two_factor).await?;
                stdin.write_all(format!("{}\n", code).as_bytes()).await?;
                stdin.flush().await?;
                continue;
            }
            last_line = Some(line);
        }
        drop(stdin);

        let status = child.wait().await?;
        if !status.success() {
            return Err(LoginError::HelperFailed(status));
        }

        let last_line = last_line.ok_or(LoginError::NoCookies)?;
        let cookies: CookieSet = serde_json::from_str(&last_line)
            .map_err(|e| LoginError::InvalidOutput(format!("{}: {}", e, last_line)))?;
        if cookies.is_empty() {
            return Err(LoginError::NoCookies);
        }
        Ok(cookies)
    }
}

#[async_trait]
impl LoginFlow for CommandLogin {
    async fn perform_login(&self, config: &UserConfig, interactive: bool) -> Result<CookieSet, LoginError> {
        let kind = config.credential.two_factor.kind;
        if !self.two_factor.supports(kind) {
            return Err(LoginError::UnsupportedTwoFactor(kind));
        }

        info!(username = %config.username(), "Performing login");
        match tokio::time::timeout(self.timeout, self.run_helper(config, interactive)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(username = %config.username(), "Login helper timed out");
                Err(LoginError::Timeout(self.timeout.as_secs()))
            }
        }
    }
}
