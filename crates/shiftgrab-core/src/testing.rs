//! Builders shared by tests here and in downstream crates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::config::ConfigSource;
use crate::models::{
    Credential, PickWindowConfig, RuleInterval, ShiftOpportunity, TwoFactorKind, TwoFactorMethod,
    UserConfig,
};

/// Parse an RFC 3339 timestamp; panics on bad input.
pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid test timestamp")
        .with_timezone(&Utc)
}

/// A config for `username` with one rule covering 2026-10-19..2026-10-26.
pub fn user_config(username: &str) -> UserConfig {
    user_config_with_rules(
        username,
        vec![RuleInterval::new(utc("2026-10-19T00:00:00Z"), utc("2026-10-26T00:00:00Z")).expect("valid rule")],
    )
}

pub fn user_config_with_rules(username: &str, rules: Vec<RuleInterval>) -> UserConfig {
    UserConfig {
        credential: Credential {
            username: username.to_string(),
            password: "hunter2".to_string(),
            two_factor: TwoFactorMethod::new(TwoFactorKind::Outlook, format!("{}@example.com", username)),
            priority: 0,
            skills: None,
        },
        pick_window: PickWindowConfig::new(rules),
    }
}

pub fn opportunity(id: &str, start: &str, end: &str) -> ShiftOpportunity {
    ShiftOpportunity {
        id: id.to_string(),
        skill: "Sort".to_string(),
        start: utc(start),
        end: utc(end),
        is_eligible: true,
        unavailability_reasons: vec![],
        shift_id: None,
        duration_minutes: None,
    }
}

/// In-memory `ConfigSource` keyed by path. Paths with no entry fail to load.
#[derive(Clone, Default)]
pub struct FakeConfigSource {
    configs: Arc<Mutex<HashMap<PathBuf, UserConfig>>>,
    loads: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, config: UserConfig) {
        self.configs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into(), config);
    }

    pub fn remove(&self, path: &Path) {
        self.configs.lock().unwrap_or_else(|e| e.into_inner()).remove(path);
    }

    /// Paths loaded so far, in order.
    pub fn loads(&self) -> Vec<PathBuf> {
        self.loads.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ConfigSource for FakeConfigSource {
    fn load(&self, path: &Path) -> Option<UserConfig> {
        self.loads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.to_path_buf());
        self.configs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }
}
