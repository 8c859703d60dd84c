//! Momento daemon for queued annotation jobs.
//!
//! When `pipeline.runner = "queue"`, submitting a photo only records a row in
//! the `annotation_jobs` table. This daemon polls that table and runs the
//! jobs on a bounded worker pool. The daemon and the submitting processes
//! communicate only through the shared SQLite database.
//!
//! ## Usage
//!
//! ```bash
//! momento-daemon              # Run in foreground
//! momento-daemon --once       # Drain one batch and exit
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use momento::annotate::Annotator;
use momento::config::Config;
use momento::db::Database;
use momento::logging;
use momento::tasks::{InProcessRunner, JobRunner, QueueWorker};

/// Daemon configuration
#[derive(Default)]
struct DaemonConfig {
    /// Poll interval override (seconds)
    poll_interval: Option<u64>,
    /// Run once and exit
    once: bool,
    /// Config path override
    config_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let daemon_config = parse_args();

    // Initialize logging
    logging::init_daemon()?;

    info!("Momento daemon starting...");

    // Load application config
    let config = match &daemon_config.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!(vision = ?config.vision, "Config loaded");

    // Open database
    let db = Database::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    db.initialize().context("Failed to initialize database")?;
    info!("Database opened at {:?}", config.db_path);

    let annotator = Arc::new(Annotator::from_config(Arc::new(db.clone()), &config));
    let pool = Arc::new(InProcessRunner::requeuing(
        annotator,
        config.pipeline.max_concurrency,
        db.clone(),
    ));
    // Keep a few batches' worth in the pool's channel at most.
    let batch_size = config.pipeline.max_concurrency.max(1) * 4;
    let worker = Arc::new(QueueWorker::new(db, Arc::clone(&pool), batch_size));

    if daemon_config.once {
        info!("Running in single-shot mode");
        drain(&worker).await;
        let pool = Arc::clone(&pool);
        tokio::task::spawn_blocking(move || pool.finish())
            .await
            .context("Worker pool join failed")?;
    } else {
        let interval = daemon_config
            .poll_interval
            .unwrap_or(config.pipeline.poll_interval_secs)
            .max(1);
        info!("Running in daemon mode, polling every {} seconds", interval);
        run_daemon_loop(&worker, Duration::from_secs(interval)).await;

        info!("Shutting down, waiting for in-flight annotations");
        let pool = Arc::clone(&pool);
        tokio::task::spawn_blocking(move || pool.shutdown())
            .await
            .context("Worker pool join failed")?;
    }

    info!("Momento daemon stopped");
    Ok(())
}

async fn run_daemon_loop(worker: &Arc<QueueWorker>, poll_interval: Duration) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => drain(worker).await,
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }
}

/// Drain one batch on the blocking pool so SQLite calls stay off the runtime.
async fn drain(worker: &Arc<QueueWorker>) {
    let worker = Arc::clone(worker);
    match tokio::task::spawn_blocking(move || worker.drain()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Failed to drain annotation queue: {}", e),
        Err(e) => error!("Drain task panicked: {}", e),
    }
}

fn parse_args() -> DaemonConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DaemonConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                config.once = true;
            }
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    if let Ok(interval) = args[i + 1].parse() {
                        config.poll_interval = Some(interval);
                    }
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    config
}

fn print_help() {
    println!(
        r#"momento-daemon - Background annotation worker for Momento

USAGE:
    momento-daemon [OPTIONS]

OPTIONS:
    --once, -1          Drain one batch of queued jobs and exit
    --interval, -i N    Poll interval in seconds (default: pipeline.poll_interval_secs)
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    MOMENTO_CONFIG      Path to config file (overrides default location)
    MOMENTO_LOG         Log level (trace, debug, info, warn, error)

Ctrl-C stops polling, lets running annotations finish without starting new
vision requests, and returns unstarted jobs to the queue."#
    );
}
