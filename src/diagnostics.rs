//! Tracing subscriber setup.
//!
//! Logs go to stderr, filtered by `RUST_LOG` when set and by
//! [`LoggingConfig::filter`] otherwise. With a log directory configured,
//! records are also written to a daily-rolling `murmur.log.YYYY-MM-DD` file
//! through a non-blocking writer; keep the returned guard alive for as long
//! as logs should be flushed.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::config::LoggingConfig;
use crate::error::{MurmurError, Result};

/// File name prefix for rolling log files.
pub const LOG_FILE_PREFIX: &str = "murmur.log";

/// Build the filter: `RUST_LOG` wins over the configured directive.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter)
            .map_err(|e| MurmurError::Logging(format!("bad filter {:?}: {e}", config.filter))),
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns [`MurmurError::Logging`] if the filter is invalid or a subscriber
/// is already installed, and [`MurmurError::Io`] if the log directory cannot
/// be created.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (file, guard) = tracing_appender::non_blocking(appender);
            builder
                .with_writer(std::io::stderr.and(file))
                .with_ansi(false)
                .try_init()
                .map_err(|e| MurmurError::Logging(e.to_string()))?;
            Ok(Some(guard))
        }
        None => {
            builder
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| MurmurError::Logging(e.to_string()))?;
            Ok(None)
        }
    }
}
