//! Logging configuration with journald support on Linux.
//!
//! Both binaries log through `tracing`. On Linux the subscriber writes to
//! systemd-journald when it is reachable; otherwise the CLI logs to a daily
//! rolling file and the daemon to stderr.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "MOMENTO_LOG";

/// Log level can be controlled via the `MOMENTO_LOG` environment variable:
/// - `MOMENTO_LOG=debug` for verbose output
/// - `MOMENTO_LOG=info` for standard output (default)
/// - `MOMENTO_LOG=momento::vision=debug,warn` for per-module filtering
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(target_os = "linux")]
fn try_init_journald() -> bool {
    match tracing_journald::layer() {
        Ok(journald_layer) => tracing_subscriber::registry()
            .with(env_filter())
            .with(journald_layer)
            .try_init()
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn try_init_journald() -> bool {
    false
}

pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("momento")
        .join("logs")
}

/// Initialize logging for the CLI: journald, else a file under `log_dir`
/// (default: the local data directory).
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    if try_init_journald() {
        tracing::info!("Logging initialized with journald backend");
        return Ok(());
    }

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "momento.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes on drop, so it has to live for the whole process.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .context("Failed to set tracing subscriber")?;

    tracing::info!("Logging initialized with file backend at {:?}", log_dir);
    Ok(())
}

/// Initialize logging for the daemon: journald, else stderr.
pub fn init_daemon() -> Result<()> {
    if try_init_journald() {
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Failed to set tracing subscriber")?;

    Ok(())
}
