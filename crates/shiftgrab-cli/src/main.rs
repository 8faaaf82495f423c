//! shiftgrab - keeps A to Z sessions alive and claims matching shifts.
//!
//! Loads every user config under the config directory, watches it for
//! changes, and runs the scheduler until interrupted.

mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shiftgrab_core::auth::two_factor::{DEFAULT_MAIL_FOLDER, DEFAULT_TOKEN_DIR};
use shiftgrab_core::auth::{CommandLogin, OutlookCodeProvider, TwoFactorProviders};
use shiftgrab_core::models::TwoFactorKind;
use shiftgrab_core::scheduler::DEFAULT_TICK_INTERVAL_SECS;
use shiftgrab_core::{
    ApiClient, ConfigSource, Endpoints, Scheduler, SchedulerOptions, SessionRegistry, TomlConfigSource,
};

use watcher::{apply_events, ConfigWatcher, DEFAULT_POLL_INTERVAL_SECS};

#[derive(Parser, Debug)]
#[command(name = "shiftgrab", version, about = "Unattended A to Z shift picker")]
struct Args {
    /// Directory holding per-user *.toml configs (searched recursively)
    #[arg(long, alias = "config_dir", default_value = "config")]
    config_dir: PathBuf,

    /// Let the login helper show its browser window
    #[arg(long, alias = "show_browser")]
    show_browser: bool,

    /// Only work on this username
    #[arg(long, alias = "single_user")]
    single_user: Option<String>,

    /// Also write logs to this file
    #[arg(long, alias = "log_file")]
    log_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Browser-automation helper that performs the interactive login
    #[arg(long, env = "SHIFTGRAB_LOGIN_COMMAND", default_value = "shiftgrab-login")]
    login_command: PathBuf,

    /// Directory of per-mailbox Outlook token files
    #[arg(long, env = "O365_TOKEN_DIR")]
    token_dir: Option<PathBuf>,

    /// Mail folder the verification mails land in
    #[arg(long, env = "O365_FOLDER_NAME", default_value = DEFAULT_MAIL_FOLDER)]
    mail_folder: String,

    /// Seconds between scheduler ticks
    #[arg(long, env = "SHIFTGRAB_TICK_SECS", default_value_t = DEFAULT_TICK_INTERVAL_SECS)]
    tick_secs: u64,
}

impl Args {
    fn token_dir(&self) -> PathBuf {
        self.token_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|d| d.join("shiftgrab").join(DEFAULT_TOKEN_DIR))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_DIR))
        })
    }
}

/// Initialize the tracing subscriber. Use RUST_LOG to override the level.
///
/// The returned guard flushes the log file on drop and must be held for the
/// life of the process.
fn init_tracing(debug: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let name = path
                .file_name()
                .with_context(|| format!("Log file has no file name: {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let _log_guard = init_tracing(args.debug, args.log_file.as_deref())?;
    info!(config_dir = %args.config_dir.display(), "shiftgrab starting");

    let endpoints = Arc::new(Endpoints::default());

    let outlook = OutlookCodeProvider::new(args.token_dir(), args.mail_folder.clone())
        .context("Failed to build Outlook client")?;
    let two_factor = TwoFactorProviders::new().with(TwoFactorKind::Outlook, Arc::new(outlook));
    let login = Arc::new(CommandLogin::new(args.login_command.clone(), two_factor));

    let config_source: Arc<dyn ConfigSource> = Arc::new(TomlConfigSource);
    let registry = Arc::new(Mutex::new(SessionRegistry::new(
        config_source.clone(),
        login,
        endpoints.clone(),
    )));

    let mut config_watcher = ConfigWatcher::new(&args.config_dir);
    let initial = config_watcher
        .poll()
        .with_context(|| format!("Failed to read config directory {}", args.config_dir.display()))?;
    apply_events(&registry, config_source.as_ref(), initial).await;
    info!(sessions = registry.lock().await.len(), "Initial configs loaded");

    let api = Arc::new(ApiClient::new(endpoints));
    let options = SchedulerOptions {
        tick_interval: Duration::from_secs(args.tick_secs),
        interactive: args.show_browser,
        single_user: args.single_user.clone(),
    };
    let scheduler = Scheduler::new(registry.clone(), api, options);

    let shutdown = CancellationToken::new();
    let watcher_task = tokio::spawn(watcher::watch(
        config_watcher,
        registry,
        config_source,
        Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        shutdown.clone(),
    ));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();

    watcher_task.await.context("Config watcher task failed")?;
    scheduler_task.await.context("Scheduler task failed")?;

    info!("shiftgrab stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["shiftgrab"]).expect("args should parse");
        assert_eq!(args.config_dir, PathBuf::from("config"));
        assert!(!args.show_browser);
        assert!(!args.debug);
        assert!(args.single_user.is_none());
    }

    #[test]
    fn test_args_accept_underscore_flags() {
        let args = Args::try_parse_from([
            "shiftgrab",
            "--config_dir",
            "/etc/shiftgrab",
            "--show_browser",
            "--single_user",
            "jdoe",
            "--log_file",
            "/var/log/shiftgrab.log",
            "--debug",
        ])
        .expect("args should parse");
        assert_eq!(args.config_dir, PathBuf::from("/etc/shiftgrab"));
        assert!(args.show_browser);
        assert_eq!(args.single_user.as_deref(), Some("jdoe"));
        assert_eq!(args.log_file, Some(PathBuf::from("/var/log/shiftgrab.log")));
        assert!(args.debug);
    }

    #[test]
    fn test_explicit_token_dir_wins() {
        let args = Args::try_parse_from(["shiftgrab", "--token-dir", "/tokens"]).expect("args should parse");
        assert_eq!(args.token_dir(), PathBuf::from("/tokens"));
    }
}
