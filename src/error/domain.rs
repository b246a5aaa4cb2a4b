//! Domain-specific error types using `thiserror`.
//!
//! This module defines the main error enums for the two domains of the
//! player core: audio playback and the music library.

use std::{io::Error as IoError, result::Result as StdResult};

use {anyhow::Error, sqlx::Error as SqlxError, thiserror::Error};

use crate::{
    audio::{decoder::DecoderError, metadata::MetadataError, output::OutputError},
    library::schema::SchemaError,
};

/// Audio-related errors.
#[derive(Error, Debug)]
pub enum AudioError {
    /// Decoder error from the audio decoder module.
    #[error("Decoder error: {0}")]
    DecoderError(#[from] DecoderError),
    /// Output error from the audio output module.
    #[error("Output error: {0}")]
    OutputError(#[from] OutputError),
    /// Metadata error from the metadata extraction module.
    #[error("Metadata error: {0}")]
    MetadataError(#[from] MetadataError),
    /// Invalid operation for current state.
    #[error("Invalid operation: {reason}")]
    InvalidOperation { reason: String },
    /// Track not found or not loaded.
    #[error("No track loaded")]
    NoTrackLoaded,
    /// The engine control loop is no longer running.
    #[error("Audio engine is shut down")]
    EngineShutDown,
}

/// Library-related errors.
#[derive(Error, Debug)]
pub enum LibraryError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),
    /// Schema initialization error.
    #[error("Schema error: {0}")]
    SchemaError(#[from] SchemaError),
    /// File system error while walking a folder.
    #[error("IO error: {0}")]
    IoError(#[from] IoError),
    /// Invalid file path or metadata.
    #[error("Invalid data: {reason}")]
    InvalidData { reason: String },
    /// Record not found.
    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: i64 },
    /// A uniquely named record already exists.
    #[error("{entity} named '{name}' already exists")]
    DuplicateName { entity: String, name: String },
}

/// Operational error context propagation with `anyhow`.
///
/// This type is used for operational errors that need rich context
/// but don't require specific handling logic.
pub type Result<T> = StdResult<T, Error>;
