//! Sonance - desktop music player core
//!
//! A SQLite-backed music library with a folder indexer, a decode/output
//! audio engine with a play queue, and a view-model state layer that mirrors
//! both for a user interface.

pub mod audio;
pub mod config;
pub mod error;
pub mod library;
pub mod logging;
pub mod state;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use {
    audio::{
        engine::{AudioEngine, EngineConfig, EngineEvent, PlaybackState, TrackInfo},
        metadata::AudioMetadata,
        queue::{PlaybackQueue, RepeatMode},
        queue_manager::{QueueEvent, QueueManager},
    },
    config::{SettingsManager, UserSettings},
    error::{AudioError, LibraryError},
    library::{LibraryDatabase, LibraryIndexer},
    logging::{LoggingConfig, init_logging},
    state::{AppState, AppStateEvent},
};
