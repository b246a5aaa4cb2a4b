//! Music library management system.
//!
//! This module provides the SQLite-backed library: schema management, data
//! models, database operations and the folder indexer.

pub mod database;
pub mod indexer;
pub mod models;
pub mod schema;

pub use {
    database::LibraryDatabase,
    indexer::{IndexSummary, IndexerConfig, IndexerEvent, LibraryIndexer},
    models::{Album, Artist, FolderRecord, PlaylistEntry, PlaylistRecord, ScannedSong, SongRecord},
    schema::{CURRENT_SCHEMA_VERSION, SchemaManager},
};
