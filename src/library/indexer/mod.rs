//! Library indexer.
//!
//! Walks library folders, extracts tag metadata on blocking tasks and keeps
//! the database in step with what is on disk.

use std::{collections::HashSet, path::Path, sync::Arc};

use {
    serde::{Deserialize, Serialize},
    tokio::sync::broadcast::{Receiver, Sender, channel},
    tracing::{debug, info},
};

use crate::{
    audio::artwork_cache::ArtworkCache,
    error::{ErrorReporter, LibraryError, ResultExt},
    library::{
        database::LibraryDatabase,
        indexer::handlers::{collect_audio_files, read_scanned_files},
    },
};

mod config;
pub mod handlers;

pub use config::IndexerConfig;

/// Outcome of indexing one folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    /// Songs inserted or updated.
    pub indexed: usize,
    /// Files that could not be read.
    pub skipped: usize,
    /// Songs removed because their file is gone.
    pub removed: usize,
}

/// Events emitted by the library indexer.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexerEvent {
    /// A folder finished indexing.
    FolderIndexed {
        folder: String,
        summary: IndexSummary,
    },
    /// A folder and its songs were removed.
    FolderRemoved { folder: String },
    /// The library has been modified (add/remove/update).
    LibraryChanged,
}

/// Keeps the library database in sync with the folders on disk.
#[derive(Debug, Clone)]
pub struct LibraryIndexer {
    database: LibraryDatabase,
    artwork_cache: Option<Arc<ArtworkCache>>,
    config: IndexerConfig,
    event_sender: Sender<IndexerEvent>,
}

impl LibraryIndexer {
    /// Creates a new library indexer.
    pub fn new(database: LibraryDatabase, config: Option<IndexerConfig>) -> Self {
        let (event_sender, _) = channel(32);
        Self {
            database,
            artwork_cache: None,
            config: config.unwrap_or_default(),
            event_sender,
        }
    }

    /// Evicts entries from `cache` whenever songs change or disappear.
    #[must_use]
    pub fn with_artwork_cache(mut self, cache: Arc<ArtworkCache>) -> Self {
        self.artwork_cache = Some(cache);
        self
    }

    /// The indexed database.
    pub fn database(&self) -> &LibraryDatabase {
        &self.database
    }

    /// Gets the current indexer configuration.
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Subscribe to indexer events.
    pub fn subscribe(&self) -> Receiver<IndexerEvent> {
        self.event_sender.subscribe()
    }

    /// Indexes one folder, registering it first if needed.
    ///
    /// Unreadable files are logged and counted as skipped. Songs of this
    /// folder whose file no longer exists are removed.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the folder cannot be read or a database
    /// write fails.
    pub async fn index_folder<P: AsRef<Path>>(&self, path: P) -> Result<IndexSummary, LibraryError> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(LibraryError::InvalidData {
                reason: format!("{} is not a directory", path.display()),
            });
        }

        let folder_path = path.to_string_lossy().to_string();
        let folder = self.database.add_folder(&folder_path).await?;
        info!(folder = %folder_path, "Indexing folder");

        let files = {
            let root = path.to_path_buf();
            tokio::task::spawn_blocking(move || collect_audio_files(&root))
                .await
                .map_err(|e| LibraryError::InvalidData {
                    reason: format!("folder walk failed: {e}"),
                })??
        };

        let on_disk: HashSet<String> = files
            .iter()
            .map(|file| file.to_string_lossy().to_string())
            .collect();

        let (songs, skipped) =
            read_scanned_files(files, self.config.max_concurrent_metadata_tasks).await;

        let mut indexed = 0;
        for batch in songs.chunks(self.config.batch_size.max(1)) {
            indexed += self.database.upsert_songs(folder.id, batch).await?;
            if let Some(cache) = &self.artwork_cache {
                for song in batch {
                    cache.remove(&song.metadata.path);
                }
            }
        }

        let stale: Vec<String> = self
            .database
            .get_song_paths_in_folder(folder.id)
            .await?
            .into_iter()
            .filter(|song_path| !on_disk.contains(song_path))
            .collect();
        let removed = self.database.remove_songs_by_paths(&stale).await?;
        if let Some(cache) = &self.artwork_cache {
            for song_path in &stale {
                cache.remove(song_path);
            }
        }

        let summary = IndexSummary {
            indexed,
            skipped,
            removed: usize::try_from(removed).unwrap_or(usize::MAX),
        };
        info!(
            folder = %folder_path,
            indexed = summary.indexed,
            skipped = summary.skipped,
            removed = summary.removed,
            "Folder indexed"
        );

        self.emit(IndexerEvent::FolderIndexed {
            folder: folder_path,
            summary,
        });
        self.emit(IndexerEvent::LibraryChanged);
        Ok(summary)
    }

    /// Re-indexes every registered folder.
    ///
    /// Folders that fail are logged and left out of the result.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the folder list cannot be read.
    pub async fn rescan_all(&self) -> Result<Vec<(String, IndexSummary)>, LibraryError> {
        let folders = self.database.get_folders().await?;
        let mut summaries = Vec::with_capacity(folders.len());

        for folder in folders {
            match self
                .index_folder(&folder.path)
                .await
                .add_contextf(format!("Rescanning {}", folder.path))
            {
                Ok(summary) => summaries.push((folder.path, summary)),
                Err(e) => ErrorReporter::warn(&e, "Folder left out of rescan"),
            }
        }

        Ok(summaries)
    }

    /// Removes a folder and everything indexed from it.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the deletion fails.
    pub async fn remove_folder(&self, path: &str) -> Result<bool, LibraryError> {
        if !self.database.remove_folder(path).await? {
            debug!("Folder {path} was not registered");
            return Ok(false);
        }

        if let Some(cache) = &self.artwork_cache {
            cache.remove_prefix(&format!("{}/", path.trim_end_matches('/')));
        }

        self.emit(IndexerEvent::FolderRemoved {
            folder: path.to_string(),
        });
        self.emit(IndexerEvent::LibraryChanged);
        Ok(true)
    }

    /// Removes one song from the library.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if the deletion fails.
    pub async fn remove_song(&self, path: &str) -> Result<bool, LibraryError> {
        let removed = self.database.remove_song(path).await?;
        if let Some(cache) = &self.artwork_cache {
            cache.remove(path);
        }
        if removed {
            self.emit(IndexerEvent::LibraryChanged);
        }
        Ok(removed)
    }

    fn emit(&self, event: IndexerEvent) {
        // No subscribers is fine.
        let _ = self.event_sender.send(event);
    }
}
