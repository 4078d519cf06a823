//! Rollcall daemon: marks attendance from an inbox of captured frames.
//!
//! Cameras (or an upload handler) drop frames into the configured inbox
//! directory. Every poll the daemon matches each face in each new frame
//! against the enrolled gallery and marks recognised people present for the
//! day. Handled frames are moved into `processed/`, unreadable ones into
//! `failed/`.
//!
//! ## Usage
//!
//! ```bash
//! rollcall-daemon              # Run in foreground
//! rollcall-daemon --once       # Process the inbox once and exit
//! ```

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use rollcall::attendance::AttendanceService;
use rollcall::config::Config;
use rollcall::db::Database;
use rollcall::faces::{GalleryCache, OnnxEncoder};
use rollcall::inbox::{within_hours, InboxProcessor, InboxSummary};
use rollcall::logging::{self, Fallback};

/// Daemon configuration
struct DaemonConfig {
    /// Overrides the configured poll interval (seconds)
    poll_interval: Option<u64>,
    /// Run once and exit
    once: bool,
    /// Config path override
    config_path: Option<PathBuf>,
}

fn parse_args() -> DaemonConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DaemonConfig {
        poll_interval: None,
        once: false,
        config_path: None,
    };

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
        r#"rollcall-daemon - Inbox watcher for face-recognition attendance

USAGE:
    rollcall-daemon [OPTIONS]

OPTIONS:
    --once, -1          Process the inbox once and exit
    --interval, -i N    Poll interval in seconds (default: from config)
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    ROLLCALL_CONFIG     Path to config file (overrides default location)
    ROLLCALL_LOG        Log level (trace, debug, info, warn, error)

Frames are only processed inside the configured hours of operation
([inbox] hours_start / hours_end), if set."#
    );
}

/// Everything one inbox pass needs; owned so it can move onto the blocking pool.
struct Worker {
    db: Database,
    encoder: OnnxEncoder,
    cache: GalleryCache,
    config: Config,
}

impl Worker {
    fn open(config: Config) -> Result<Self> {
        let db = Database::open(config.db_path())?;
        db.initialize()?;

        let encoder = OnnxEncoder::new(&config.models);
        if let Err(e) = encoder.warm_up() {
            warn!("Face models not loaded yet, will retry on first capture: {:#}", e);
        }

        Ok(Self {
            db,
            encoder,
            cache: GalleryCache::new(Duration::from_secs(config.recognition.cache_ttl_secs)),
            config,
        })
    }

    fn run_pass(&self) -> Result<InboxSummary> {
        let service = AttendanceService::new(&self.db, &self.encoder, &self.cache, &self.config.recognition)?;
        let processor = InboxProcessor::new(&self.db, &service, &self.config.inbox);
        processor.run_once(Local::now().naive_local())
    }
}

async fn run_pass(worker: &Arc<Mutex<Worker>>) -> Result<InboxSummary> {
    let worker = Arc::clone(worker);
    tokio::task::spawn_blocking(move || {
        let worker = worker
            .lock()
            .map_err(|_| anyhow!("worker lock poisoned"))?;
        worker.run_pass()
    })
    .await
    .context("Inbox pass panicked")?
}

#[tokio::main]
async fn main() -> Result<()> {
    let daemon_config = parse_args();

    // Journald on Linux, stderr otherwise
    logging::init(Fallback::Stderr)?;

    info!("Rollcall daemon starting...");

    let config = match &daemon_config.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let poll_interval = daemon_config
        .poll_interval
        .unwrap_or(config.inbox.poll_interval_secs)
        .max(1);
    let hours = (config.inbox.hours_start, config.inbox.hours_end);
    info!(inbox = %config.inbox.path.display(), db = %config.db_path().display(), "Config loaded");

    let worker = Arc::new(Mutex::new(Worker::open(config)?));

    if daemon_config.once {
        info!("Running in single-shot mode");
        let summary = run_pass(&worker).await?;
        info!(?summary, "Inbox processed");
        return Ok(());
    }

    info!("Running in daemon mode, polling every {} seconds", poll_interval);

    let mut ticker = tokio::time::interval(Duration::from_secs(poll_interval));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !within_hours(hours.0, hours.1, Local::now().time()) {
                    tracing::debug!("Outside hours of operation, skipping this cycle");
                    continue;
                }
                if let Err(e) = run_pass(&worker).await {
                    error!("Error processing inbox: {:#}", e);
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    info!("Rollcall daemon stopped");
    Ok(())
}
