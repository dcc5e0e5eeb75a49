//! Logging setup for the resonance tracker.
//!
//! Configures tracing with JSON output to stderr and, optionally, to a
//! daily-rotating log file under `<data_local_dir>/resonance-tracker/`.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Directory name under the platform data directory
const LOG_DIR: &str = "resonance-tracker";
/// Maximum number of log files to retain
const MAX_LOG_FILES: usize = 3;

/// Initialize the logging system.
///
/// Logs are written in JSON format to stderr, and to a rotating file when
/// `to_file` is set. The level defaults to `info` and follows `RUST_LOG`.
pub fn init_logging(to_file: bool) -> Result<LogGuard, LoggingError> {
    let (non_blocking_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    let (file_layer, file_guard) = if to_file {
        let log_dir = get_log_directory()?;

        std::fs::create_dir_all(&log_dir).map_err(|e| LoggingError::DirectoryCreationFailed {
            path: log_dir.display().to_string(),
            source: e,
        })?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .max_log_files(MAX_LOG_FILES)
            .filename_prefix("tracker")
            .filename_suffix("log")
            .build(&log_dir)
            .map_err(|e| LoggingError::AppenderCreationFailed(e.to_string()))?;

        let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

        let layer = fmt::layer()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(non_blocking_file);

        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_current_span(true)
        .with_writer(non_blocking_stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LogGuard {
        _stderr_guard: stderr_guard,
        _file_guard: file_guard,
    })
}

/// Get the log directory path.
fn get_log_directory() -> Result<PathBuf, LoggingError> {
    dirs::data_local_dir()
        .map(|dir| dir.join(LOG_DIR))
        .ok_or(LoggingError::HomeDirectoryNotFound)
}

/// Guard that keeps the non-blocking writers alive.
/// Must be held for the lifetime of the application.
pub struct LogGuard {
    _stderr_guard: WorkerGuard,
    _file_guard: Option<WorkerGuard>,
}

/// Errors related to logging initialization.
#[derive(Debug)]
pub enum LoggingError {
    /// No platform data directory could be determined
    HomeDirectoryNotFound,
    /// Failed to create log directory
    DirectoryCreationFailed {
        path: String,
        source: std::io::Error,
    },
    /// Failed to create file appender
    AppenderCreationFailed(String),
    /// A global subscriber was already installed
    AlreadyInitialized(String),
}

impl std::fmt::Display for LoggingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggingError::HomeDirectoryNotFound => {
                write!(f, "Could not determine the local data directory")
            }
            LoggingError::DirectoryCreationFailed { path, source } => {
                write!(f, "Failed to create log directory '{}': {}", path, source)
            }
            LoggingError::AppenderCreationFailed(msg) => {
                write!(f, "Failed to create log file appender: {}", msg)
            }
            LoggingError::AlreadyInitialized(msg) => {
                write!(f, "Logging already initialized: {}", msg)
            }
        }
    }
}

impl std::error::Error for LoggingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoggingError::DirectoryCreationFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}
