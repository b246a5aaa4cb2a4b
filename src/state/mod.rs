//! Centralized state management with reactive updates for UI bindings.
//!
//! This module provides the view-model layer that mirrors playback, queue
//! and library events into thread-safe snapshots.

pub mod app_state;

pub use app_state::{AppState, AppStateEvent, LibrarySnapshot, PlaybackSnapshot};
