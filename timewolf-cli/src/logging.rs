use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{AppError, Result};

pub const DEFAULT_LOG_FILTER: &str = "timewolf=info,timewolf_engine=info";
const VERBOSE_LOG_FILTER: &str = "timewolf=debug,timewolf_engine=debug";
const LOG_FILE_NAME: &str = "timewolf.log";

/// Location of the run log.
pub fn log_file_path() -> PathBuf {
    std::env::temp_dir().join(LOG_FILE_NAME)
}

/// Pick the filter: `-q` and `-v` win over `RUST_LOG`, which wins over the
/// configured filter.
pub fn build_filter(verbose: bool, quiet: bool, configured: Option<&str>) -> EnvFilter {
    if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(configured.unwrap_or(DEFAULT_LOG_FILTER)))
    }
}

/// Install console and file logging.
///
/// Keep the returned guard alive until exit so buffered file lines are flushed.
pub fn init_logging(verbose: bool, quiet: bool, configured: Option<&str>) -> Result<WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(std::env::temp_dir(), LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(build_filter(verbose, quiet, configured))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()
        .map_err(|e| AppError::Logging(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guard)
}
