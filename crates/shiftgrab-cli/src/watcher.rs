//! Polls the config directory and keeps the session registry in step with it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use shiftgrab_core::config::discover_config_files;
use shiftgrab_core::{ConfigSource, SessionRegistry};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often the config directory is rescanned
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

/// Modification stamp of one file; size catches rewrites within the mtime
/// resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl Stamp {
    fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

pub struct ConfigWatcher {
    dir: PathBuf,
    seen: HashMap<PathBuf, Stamp>,
}

impl ConfigWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seen: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rescan the directory and report what changed since the last poll.
    /// The first poll reports every existing file as created.
    pub fn poll(&mut self) -> std::io::Result<Vec<ConfigEvent>> {
        let mut current = HashMap::new();
        for path in discover_config_files(&self.dir)? {
            // A file can vanish between listing and stat
            match Stamp::of(&path) {
                Ok(stamp) => {
                    current.insert(path, stamp);
                }
                Err(e) => debug!(path = %path.display(), error = %e, "Config file disappeared during scan"),
            }
        }

        let mut events = Vec::new();
        let mut paths: Vec<&PathBuf> = current.keys().collect();
        paths.sort();
        for path in paths {
            match self.seen.get(path) {
                None => events.push(ConfigEvent::Created(path.clone())),
                Some(previous) if previous != &current[path] => events.push(ConfigEvent::Modified(path.clone())),
                Some(_) => {}
            }
        }

        let mut removed: Vec<PathBuf> = self
            .seen
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();
        removed.sort();
        events.extend(removed.into_iter().map(ConfigEvent::Deleted));

        self.seen = current;
        Ok(events)
    }
}

/// Apply watcher events to the registry. A file that fails to load leaves
/// the registry as it was; the next edit retries.
pub async fn apply_events(registry: &Mutex<SessionRegistry>, source: &dyn ConfigSource, events: Vec<ConfigEvent>) {
    for event in events {
        match event {
            ConfigEvent::Created(path) => {
                info!(path = %path.display(), "Config file created");
                let Some(config) = source.load(&path) else {
                    continue;
                };
                if let Err(e) = registry.lock().await.create(config, Some(path.clone())) {
                    error!(path = %path.display(), error = %e, "Failed to create session");
                }
            }
            ConfigEvent::Modified(path) => {
                info!(path = %path.display(), "Config file modified");
                let Some(config) = source.load(&path) else {
                    continue;
                };
                let mut registry = registry.lock().await;
                // The file now names a different user: retire the old session
                if !registry.contains(config.username()) {
                    registry.delete_source(&path);
                }
                if let Err(e) = registry.update(config, Some(path.clone())) {
                    error!(path = %path.display(), error = %e, "Failed to update session");
                }
            }
            ConfigEvent::Deleted(path) => {
                info!(path = %path.display(), "Config file deleted");
                registry.lock().await.delete_source(&path);
            }
        }
    }
}

/// Poll until `shutdown` is cancelled.
pub async fn watch(
    mut watcher: ConfigWatcher,
    registry: Arc<Mutex<SessionRegistry>>,
    source: Arc<dyn ConfigSource>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    debug!(dir = %watcher.dir().display(), "Config watcher started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match watcher.poll() {
            Ok(events) if events.is_empty() => {}
            Ok(events) => apply_events(&registry, source.as_ref(), events).await,
            Err(e) => warn!(dir = %watcher.dir().display(), error = %e, "Failed to scan config directory"),
        }
    }
    debug!("Config watcher stopped");
}
