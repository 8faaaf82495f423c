//! The username → session store.
//!
//! The registry does no locking of its own. The scheduler and the config
//! watcher share it as `Arc<tokio::sync::Mutex<SessionRegistry>>` and take the
//! lock only for the short synchronous calls below, never across network I/O.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::api::Endpoints;
use crate::auth::{LoginFlow, Session, SessionError};
use crate::config::ConfigSource;
use crate::models::UserConfig;

struct Entry {
    session: Arc<Session>,
    /// Config file the session was loaded from, if any
    source: Option<PathBuf>,
}

pub struct SessionRegistry {
    entries: HashMap<String, Entry>,
    config_source: Arc<dyn ConfigSource>,
    login_flow: Arc<dyn LoginFlow>,
    endpoints: Arc<Endpoints>,
}

impl SessionRegistry {
    pub fn new(
        config_source: Arc<dyn ConfigSource>,
        login_flow: Arc<dyn LoginFlow>,
        endpoints: Arc<Endpoints>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            config_source,
            login_flow,
            endpoints,
        }
    }

    /// Register a session for `config`. An existing session for the same
    /// username is returned unchanged.
    pub fn create(&mut self, config: UserConfig, source: Option<PathBuf>) -> Result<Arc<Session>, SessionError> {
        let username = config.username().to_string();
        if let Some(entry) = self.entries.get(&username) {
            warn!(username = %username, "User session already exists");
            return Ok(entry.session.clone());
        }

        info!(username = %username, source = ?source, "Creating new user session");
        let session = Arc::new(Session::new(config, self.login_flow.clone(), self.endpoints.clone())?);
        self.entries.insert(
            username,
            Entry {
                session: session.clone(),
                source,
            },
        );
        Ok(session)
    }

    /// The session for `config`'s username, created on the spot if missing.
    pub fn get(&mut self, config: UserConfig, source: Option<PathBuf>) -> Result<Arc<Session>, SessionError> {
        if let Some(entry) = self.entries.get(config.username()) {
            return Ok(entry.session.clone());
        }
        warn!(username = %config.username(), "Trying to get a user session that does not exist, creating");
        self.create(config, source)
    }

    /// Apply a modified config to its session, creating the session if needed.
    pub fn update(&mut self, config: UserConfig, source: Option<PathBuf>) -> Result<Arc<Session>, SessionError> {
        let session = self.get(config.clone(), source.clone())?;
        session.update_config(config)?;
        if let (Some(entry), Some(source)) = (self.entries.get_mut(session.username()), source) {
            entry.source = Some(source);
        }
        Ok(session)
    }

    /// Remove `session`'s entry. Removing an unknown session only warns.
    pub fn delete(&mut self, session: &Session) {
        self.delete_username(session.username());
    }

    fn delete_username(&mut self, username: &str) -> Option<PathBuf> {
        match self.entries.remove(username) {
            Some(entry) => {
                info!(username = %username, "Deleted user session");
                entry.source
            }
            None => {
                warn!(username = %username, "Attempting to delete session that doesn't exist");
                None
            }
        }
    }

    /// Remove whichever session was loaded from `path`. Returns its username.
    pub fn delete_source(&mut self, path: &Path) -> Option<String> {
        let username = self
            .entries
            .iter()
            .find(|(_, entry)| entry.source.as_deref() == Some(path))
            .map(|(username, _)| username.clone());

        match username {
            Some(username) => {
                self.delete_username(&username);
                Some(username)
            }
            None => {
                warn!(path = %path.display(), "No user session loaded from deleted config");
                None
            }
        }
    }

    /// Rebuild `session` from its config file.
    ///
    /// Fail-closed: if the file cannot be loaded the username stays absent
    /// until a later load brings it back.
    pub fn reload(&mut self, session: &Session) -> Option<Arc<Session>> {
        let username = session.username().to_string();
        if !self.entries.contains_key(&username) {
            warn!(username = %username, "Attempting to reload session that doesn't exist");
            return None;
        }

        let Some(path) = self.delete_username(&username) else {
            warn!(username = %username, "Session has no config source, dropped without reload");
            return None;
        };

        let Some(config) = self.config_source.load(&path) else {
            error!(username = %username, path = %path.display(), "Failed to reload config, session removed");
            return None;
        };
        if config.username() != username {
            warn!(
                old = %username,
                new = %config.username(),
                "Reloaded config belongs to a different user"
            );
        }

        match self.create(config, Some(path)) {
            Ok(session) => {
                info!(username = %session.username(), "User session reloaded");
                Some(session)
            }
            Err(e) => {
                error!(username = %username, error = %e, "Failed to recreate session");
                None
            }
        }
    }

    /// Whether `session`'s daily reload time passed in `(last_check, now]`.
    pub fn due_for_reload(session: &Session, last_check: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        session.config().pick_window.reload_due(last_check, now)
    }

    /// Handles to every registered session.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.entries.values().map(|e| e.session.clone()).collect()
    }

    pub fn get_by_username(&self, username: &str) -> Option<Arc<Session>> {
        self.entries.get(username).map(|e| e.session.clone())
    }

    pub fn source_of(&self, username: &str) -> Option<&Path> {
        self.entries.get(username).and_then(|e| e.source.as_deref())
    }

    pub fn contains(&self, username: &str) -> bool {
        self.entries.contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
