//! Error handling built on `thiserror` and `anyhow`.
//!
//! Domain-specific error types give callers precise matching, while the
//! operational helpers attach context and report absorbed failures.

pub mod domain;
pub mod operational;

pub use {
    domain::{AudioError, LibraryError},
    operational::{ErrorReporter, ResultExt},
};
