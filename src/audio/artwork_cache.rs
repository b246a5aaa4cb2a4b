//! Artwork caching utilities.
//!
//! A small least-recently-used cache of embedded artwork keyed by song path.
//! Artwork extraction re-parses the tags of a file, so the now-playing view
//! and list views go through this cache instead of hitting the disk.

use std::{collections::VecDeque, sync::Arc};

use {parking_lot::Mutex, tracing::debug};

/// Default number of artwork entries kept in memory.
pub const DEFAULT_ARTWORK_CACHE_CAPACITY: usize = 32;

/// Cached artwork bytes. `None` records that a file has no artwork.
pub type CachedArtwork = Option<Arc<Vec<u8>>>;

#[derive(Debug)]
struct Entry {
    path: String,
    artwork: CachedArtwork,
}

/// In-memory LRU cache for embedded artwork.
///
/// Entries are kept in recency order, most recently used at the back. All
/// access goes through a single mutex.
#[derive(Debug)]
pub struct ArtworkCache {
    entries: Mutex<VecDeque<Entry>>,
    capacity: usize,
}

impl Default for ArtworkCache {
    fn default() -> Self {
        Self::new(DEFAULT_ARTWORK_CACHE_CAPACITY)
    }
}

impl ArtworkCache {
    /// Creates a new artwork cache holding at most `capacity` entries.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Gets the cached artwork for a song, marking it most recently used.
    ///
    /// Returns `None` on a cache miss and `Some(None)` when the song is known
    /// to have no artwork.
    pub fn get(&self, path: &str) -> Option<CachedArtwork> {
        let mut entries = self.entries.lock();
        let position = entries.iter().position(|entry| entry.path == path)?;
        let entry = entries.remove(position)?;
        let artwork = entry.artwork.clone();
        entries.push_back(entry);
        Some(artwork)
    }

    /// Inserts or replaces the artwork for a song.
    pub fn insert(&self, path: &str, artwork: CachedArtwork) {
        let mut entries = self.entries.lock();
        if let Some(position) = entries.iter().position(|entry| entry.path == path) {
            entries.remove(position);
        }
        while entries.len() >= self.capacity {
            if let Some(evicted) = entries.pop_front() {
                debug!("Evicting artwork for {}", evicted.path);
            }
        }
        entries.push_back(Entry {
            path: path.to_string(),
            artwork,
        });
    }

    /// Returns cached artwork, loading and caching it on a miss.
    ///
    /// The loader runs outside the lock. A loader error is treated as
    /// "no artwork" but is not cached, so the next call retries.
    pub fn get_or_load<F, E>(&self, path: &str, loader: F) -> CachedArtwork
    where
        F: FnOnce() -> Result<Option<Vec<u8>>, E>,
        E: std::fmt::Display,
    {
        if let Some(artwork) = self.get(path) {
            return artwork;
        }

        match loader() {
            Ok(data) => {
                let artwork = data.map(Arc::new);
                self.insert(path, artwork.clone());
                artwork
            }
            Err(e) => {
                debug!("Failed to load artwork for {path}: {e}");
                None
            }
        }
    }

    /// Removes a specific song from the cache.
    pub fn remove(&self, path: &str) {
        self.entries.lock().retain(|entry| entry.path != path);
    }

    /// Removes every song whose path starts with `prefix` (folder removal).
    pub fn remove_prefix(&self, prefix: &str) {
        self.entries
            .lock()
            .retain(|entry| !entry.path.starts_with(prefix));
    }

    /// Clears the entire cache.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
