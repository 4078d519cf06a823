//! Logging configuration with journald support on Linux.
//!
//! Both binaries log through `tracing`. On Linux the subscriber writes to
//! systemd-journald when the journal socket is reachable; otherwise the CLI
//! falls back to a daily-rolling file and the daemon to stderr.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where log lines go when journald is not available.
#[derive(Debug, Clone)]
pub enum Fallback {
    /// Daily-rolling file in the given directory (or the data directory).
    File(Option<PathBuf>),
    Stderr,
}

/// Initialize the logging system.
///
/// Log level is read from `ROLLCALL_LOG` (`trace`, `debug`, `info`, `warn`,
/// `error`, or any `EnvFilter` directive) and defaults to `info`.
pub fn init(fallback: Fallback) -> Result<()> {
    let env_filter = EnvFilter::try_from_env("ROLLCALL_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .try_init()
                .context("Failed to set tracing subscriber")?;

            tracing::info!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    match fallback {
        Fallback::Stderr => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .context("Failed to set tracing subscriber")?;

            tracing::info!("Logging initialized with stderr backend");
        }
        Fallback::File(log_dir) => {
            let log_dir = log_dir.unwrap_or_else(|| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("rollcall")
                    .join("logs")
            });

            std::fs::create_dir_all(&log_dir)?;

            let file_appender = tracing_appender::rolling::daily(&log_dir, "rollcall.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // The guard flushes on drop; keep it for the life of the process.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .try_init()
                .context("Failed to set tracing subscriber")?;

            tracing::info!(dir = ?log_dir, "Logging initialized with file backend");
        }
    }

    Ok(())
}
