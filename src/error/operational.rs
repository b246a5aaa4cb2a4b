//! Operational error context propagation with `anyhow`.
//!
//! This module provides extension traits for enriching error context and
//! a reporter used wherever a failure is logged and absorbed.

use std::{error::Error as StdError, fmt::Display};

use {
    anyhow::{Context, Error, Result as AnyhowResult},
    tracing::{error, warn},
};

/// Extension trait for enhanced error context.
pub trait ResultExt<T, E> {
    /// Adds context to an error with a static string.
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static;

    /// Adds context to an error with a formatted string.
    fn add_contextf(self, format: impl Display) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static;

    /// Logs the error as a warning and converts it into `None`.
    fn log_absorb(self, context: &str) -> Option<T>
    where
        E: Display;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.context(context)
    }

    fn add_contextf(self, format: impl Display) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.context(format.to_string())
    }

    fn log_absorb(self, context: &str) -> Option<T>
    where
        E: Display,
    {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(context = context, error = %e, "Operation failed, continuing");
                None
            }
        }
    }
}

/// Centralized error reporting and logging.
pub struct ErrorReporter;

impl ErrorReporter {
    /// Reports a warning-level error (recoverable issues).
    pub fn warn(error: &Error, context: &str) {
        warn!(context = context, error = %error, "Warning error");
    }

    /// Reports an error-level error (non-recoverable issues).
    pub fn error(error: &Error, context: &str) {
        error!(context = context, error = %format!("{error:#}"), "Error error");
    }

    /// Converts an error to a user-friendly message.
    ///
    /// The full context chain is joined with `: ` so the outermost context
    /// leads and the root cause comes last.
    pub fn to_user_message(error: &Error) -> String {
        format!("{error:#}")
    }
}
