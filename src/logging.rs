//! Logging and tracing setup.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter`, a stderr
//! layer and a daily-rotated log file under the per-user cache directory.

use std::{io::stderr, path::PathBuf};

use {
    thiserror::Error,
    tracing::debug,
    tracing_appender::{
        non_blocking::{NonBlocking, WorkerGuard},
        rolling::{Builder, InitError, Rotation},
    },
    tracing_subscriber::{
        EnvFilter, Layer, filter::ParseError, fmt, layer::SubscriberExt,
        util::SubscriberInitExt,
    },
};

use crate::config::get_log_dir;

/// Filter applied when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_FILTER: &str = "info";

/// Prefix of rotated log file names.
const LOG_FILE_PREFIX: &str = "sonance";

/// Error type for logging initialization.
#[derive(Error, Debug)]
pub enum LoggingError {
    /// The filter directive could not be parsed.
    #[error("Invalid log filter: {0}")]
    InvalidFilter(#[from] ParseError),
    /// The rotating file appender could not be created.
    #[error("Failed to create log file appender: {0}")]
    AppenderError(#[from] InitError),
    /// A global subscriber is already installed.
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive (e.g. `"sonance=debug,sqlx=warn"`), overrides `RUST_LOG`.
    pub filter: Option<String>,
    /// Directory for rotated log files. `None` disables file logging.
    pub log_dir: Option<PathBuf>,
    /// Number of rotated files kept on disk.
    pub max_log_files: usize,
    /// Also write to stderr.
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            log_dir: Some(get_log_dir()),
            max_log_files: 7,
            stderr: true,
        }
    }
}

impl LoggingConfig {
    /// Set custom filter string.
    #[must_use]
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    /// Set the log directory.
    #[must_use]
    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }
}

/// Keeps the non-blocking file writer alive. Dropping it flushes the file.
#[derive(Debug)]
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Builds the filter: config string, then `RUST_LOG`, then `DEFAULT_FILTER`.
///
/// # Errors
///
/// Returns `LoggingError::InvalidFilter` if the config string is malformed.
pub fn build_filter(filter: Option<&str>) -> Result<EnvFilter, LoggingError> {
    match filter {
        Some(directives) => Ok(EnvFilter::builder().parse(directives)?),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

fn file_writer(config: &LoggingConfig) -> Result<Option<(NonBlocking, WorkerGuard)>, LoggingError> {
    let Some(dir) = &config.log_dir else {
        return Ok(None);
    };

    let appender = Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(config.max_log_files.max(1))
        .build(dir)?;
    Ok(Some(tracing_appender::non_blocking(appender)))
}

/// Initialize the logging system.
///
/// Call once during startup and keep the returned guard until exit.
///
/// # Errors
///
/// Returns `LoggingError` if the filter is invalid, the log directory cannot
/// be used or a global subscriber is already set.
pub fn init_logging(config: LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let filter = build_filter(config.filter.as_deref())?;

    let (file_layer, file_guard) = match file_writer(&config)? {
        Some((writer, guard)) => (
            Some(fmt::layer().with_ansi(false).with_writer(writer).boxed()),
            Some(guard),
        ),
        None => (None, None),
    };

    let stderr_layer = config
        .stderr
        .then(|| fmt::layer().with_writer(stderr).with_target(true).boxed());

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    debug!(log_dir = ?config.log_dir, "Logging initialized");

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
