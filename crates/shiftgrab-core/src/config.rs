//! User configuration loading.
//!
//! Each user is described by one TOML file in the config directory:
//!
//! ```toml
//! username = "jdoe"
//! password = "..."
//! two_factor_method = ["OUTLOOK", "jdoe@example.com"]
//! priority = 1
//! skills = ["Sort"]
//! reload_session_on = "04:00"
//!
//! [pick_shift_api_config]
//! time_to_pick = "2026-10-18 18:00"
//! time_zone = "est"
//! duration = "02:00"
//!
//! [[pick_shift_api_config.rules]]
//! start = "2026-10-20 08:00"
//! end = "2026-10-20 16:00"
//! ```
//!
//! Wall-clock times are read in `time_zone` (UTC when absent).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::models::{
    Credential, PickWindowConfig, RuleInterval, Skill, TwoFactorKind, TwoFactorMethod, UserConfig,
};
use crate::utils::{parse_datetime, parse_duration, parse_time_of_day, parse_time_zone};

/// Extension of user config files.
pub const CONFIG_EXTENSION: &str = "toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Rule interval starts after it ends: {start} > {end}")]
    InvertedInterval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("No rule intervals configured")]
    EmptyRules,
}

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawUserConfig {
    username: String,
    password: String,
    two_factor_method: (TwoFactorKind, String),
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    skills: Option<Vec<Skill>>,
    #[serde(default)]
    reload_session_on: Option<String>,
    pick_shift_api_config: RawPickWindow,
}

#[derive(Debug, Deserialize)]
struct RawPickWindow {
    #[serde(default)]
    time_to_pick: Option<String>,
    #[serde(default)]
    time_zone: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    start: String,
    end: String,
}

impl RawUserConfig {
    fn resolve(self) -> Result<UserConfig, ConfigError> {
        let window = &self.pick_shift_api_config;
        let time_zone = match &window.time_zone {
            Some(tz) => parse_time_zone(tz)?,
            None => Tz::UTC,
        };

        let mut pick_window = PickWindowConfig::new(resolve_rules(&window.rules, time_zone)?);
        pick_window.time_zone = time_zone;
        pick_window.time_to_pick = window
            .time_to_pick
            .as_deref()
            .map(|s| parse_datetime(s, time_zone))
            .transpose()?;
        if let Some(duration) = &window.duration {
            pick_window.duration = parse_duration(duration)?;
        }
        pick_window.reload_session_on = self
            .reload_session_on
            .as_deref()
            .map(parse_time_of_day)
            .transpose()?;

        let (kind, identifier) = self.two_factor_method;
        Ok(UserConfig {
            credential: Credential {
                username: self.username,
                password: self.password,
                two_factor: TwoFactorMethod::new(kind, identifier),
                priority: self.priority,
                skills: self.skills,
            },
            pick_window,
        })
    }
}

fn resolve_rules(rules: &[RawRule], tz: Tz) -> Result<Vec<RuleInterval>, ConfigError> {
    if rules.is_empty() {
        return Err(ConfigError::EmptyRules);
    }
    rules
        .iter()
        .map(|r| RuleInterval::new(parse_datetime(&r.start, tz)?, parse_datetime(&r.end, tz)?))
        .collect()
}

/// Parse the contents of a user config file.
pub fn parse_user_config(contents: &str) -> Result<UserConfig, ConfigError> {
    let raw: RawUserConfig = toml::from_str(contents)?;
    raw.resolve()
}

/// Read and parse a user config file.
pub fn load_user_config(path: &Path) -> Result<UserConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_user_config(&contents)
}

/// Whether a path looks like a user config file.
pub fn is_config_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case(CONFIG_EXTENSION))
        .unwrap_or(false)
}

/// Recursively collect all config files under `dir`, sorted by path.
pub fn discover_config_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_config_file(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

// ============================================================================
// Config source collaborator
// ============================================================================

/// Where sessions get (re)loaded from.
pub trait ConfigSource: Send + Sync {
    /// Load the config at `path`. Failures are logged and yield `None`.
    fn load(&self, path: &Path) -> Option<UserConfig>;
}

/// Loads user configs from TOML files on disk.
#[derive(Debug, Clone, Default)]
pub struct TomlConfigSource;

impl ConfigSource for TomlConfigSource {
    fn load(&self, path: &Path) -> Option<UserConfig> {
        match load_user_config(path) {
            Ok(config) => {
                debug!(path = %path.display(), username = %config.username(), "Config loaded");
                Some(config)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Error parsing config file");
                None
            }
        }
    }
}
