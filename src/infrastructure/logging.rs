//! Logging initialization: console output plus an append-only log file.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::infrastructure::config::LoggingConfig;

// Keeps the non-blocking file writer alive for the process lifetime.
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Initialize the tracing subscriber from the configured level.
///
/// Console output goes to stdout; the file layer appends to
/// `<log_dir>/<file_name>` without rotation.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;

    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("cannot create log directory {}", config.log_dir))?;

    let file_appender = tracing_appender::rolling::never(&config.log_dir, &config.file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .context("logging already initialized")?;

    Ok(())
}
