//! Logging setup.
//!
//! Installs a global `tracing` subscriber with two outputs:
//! - a log file, truncated at session start, written off-thread
//! - stdout, for watching a run live
//!
//! The filter comes from `RUST_LOG` and defaults to `info`. Per-request
//! transitions are logged at `debug`, so `RUST_LOG=terrastream=debug` shows
//! the reconciliation in detail.

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::EnvFilter;

/// Default directory for log files.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "terrastream.log";

/// Keeps the file writer alive. Dropping it flushes and closes the log.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initializes logging to `log_dir/log_file` and stdout.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the log file
/// cannot be truncated.
pub fn init_logging(log_dir: &Path, log_file: &str) -> Result<LoggingGuard, io::Error> {
    let (file_writer, guard) = prepare_log_file(log_dir, log_file)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_timer(LocalTime::rfc_3339());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .compact();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A second init in the same process is ignored
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init();

    Ok(LoggingGuard { _file_guard: guard })
}

/// Creates the directory, truncates the file and opens a non-blocking
/// writer on it.
fn prepare_log_file(
    log_dir: &Path,
    log_file: &str,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard), io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let appender = tracing_appender::rolling::never(log_dir, log_file);
    Ok(tracing_appender::non_blocking(appender))
}
