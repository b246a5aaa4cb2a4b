//! Play queue state: track list, cursor, repeat mode and shuffle.
//!
//! This is plain data with no I/O so navigation rules can be checked in
//! isolation. The `QueueManager` drives the audio engine from it.

use std::collections::HashMap;

use {
    rand::{Rng, rng},
    serde::{Deserialize, Serialize},
};

use crate::audio::metadata::AudioMetadata;

/// Wraparound behaviour at queue boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RepeatMode {
    /// Stop after the last track.
    #[default]
    Off,
    /// Repeat the current track when it finishes.
    One,
    /// Wrap around to the other end of the queue.
    All,
}

impl RepeatMode {
    /// Next mode in the toggle order used by the repeat button.
    #[must_use]
    pub fn cycle(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }
}

/// Why the queue is moving forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceReason {
    /// The current track played to its end.
    TrackFinished,
    /// The user asked for the next track.
    User,
}

/// Current playback queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackQueue {
    /// Tracks in play order.
    pub tracks: Vec<AudioMetadata>,
    /// Index of the current track.
    pub current_index: Option<usize>,
    /// Repeat mode.
    pub repeat_mode: RepeatMode,
    /// Identity of each entry in `tracks`, so duplicates of one file stay
    /// distinguishable.
    entry_ids: Vec<u64>,
    /// Entry ids in their order before shuffling, present only while
    /// shuffled.
    original_order: Option<Vec<u64>>,
    next_entry_id: u64,
}

impl PlaybackQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the queue contents, pointing at `start` when it is in range.
    ///
    /// Any shuffle state is discarded.
    pub fn set_tracks(&mut self, tracks: Vec<AudioMetadata>, start: usize) {
        self.current_index = if tracks.is_empty() {
            None
        } else {
            Some(start.min(tracks.len() - 1))
        };
        self.entry_ids = (0..tracks.len()).map(|_| self.fresh_entry_id()).collect();
        self.tracks = tracks;
        self.original_order = None;
    }

    /// Appends a track to the end of the queue.
    pub fn append(&mut self, track: AudioMetadata) {
        let id = self.fresh_entry_id();
        if let Some(original) = self.original_order.as_mut() {
            original.push(id);
        }
        self.tracks.push(track);
        self.entry_ids.push(id);
        if self.current_index.is_none() {
            self.current_index = Some(0);
        }
    }

    /// Inserts a track right after the current one.
    pub fn insert_next(&mut self, track: AudioMetadata) {
        let Some(current) = self.current_index else {
            self.append(track);
            return;
        };

        let id = self.fresh_entry_id();
        if let Some(original) = self.original_order.as_mut() {
            let current_id = self.entry_ids[current];
            let anchor = original
                .iter()
                .position(|&entry| entry == current_id)
                .map_or(original.len(), |i| i + 1);
            original.insert(anchor, id);
        }
        self.tracks.insert(current + 1, track);
        self.entry_ids.insert(current + 1, id);
    }

    /// Removes the track at `index`, keeping the cursor on the same track
    /// where possible.
    pub fn remove_at(&mut self, index: usize) -> Option<AudioMetadata> {
        if index >= self.tracks.len() {
            return None;
        }

        let removed = self.tracks.remove(index);
        let id = self.entry_ids.remove(index);
        if let Some(original) = self.original_order.as_mut() {
            original.retain(|&entry| entry != id);
        }

        self.current_index = match self.current_index {
            _ if self.tracks.is_empty() => None,
            Some(current) if index < current => Some(current - 1),
            Some(current) if current >= self.tracks.len() => Some(self.tracks.len() - 1),
            other => other,
        };

        Some(removed)
    }

    /// Empties the queue.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.entry_ids.clear();
        self.current_index = None;
        self.original_order = None;
    }

    /// The current track.
    #[must_use]
    pub fn current(&self) -> Option<&AudioMetadata> {
        self.current_index.and_then(|i| self.tracks.get(i))
    }

    /// Moves the cursor to `index` when it is in range.
    pub fn select(&mut self, index: usize) -> Option<&AudioMetadata> {
        if index < self.tracks.len() {
            self.current_index = Some(index);
            self.tracks.get(index)
        } else {
            None
        }
    }

    /// Number of tracks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether the queue has no tracks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Index that follows the current one, or `None` when playback should
    /// stop.
    #[must_use]
    pub fn next_index(&self, reason: AdvanceReason) -> Option<usize> {
        let current = self.current_index?;
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }

        match (self.repeat_mode, reason) {
            (RepeatMode::One, AdvanceReason::TrackFinished) => Some(current),
            (RepeatMode::Off, _) if current + 1 >= len => None,
            _ => Some((current + 1) % len),
        }
    }

    /// Index that precedes the current one.
    ///
    /// With repeat off the first track stays first; otherwise the queue wraps
    /// to its end.
    #[must_use]
    pub fn previous_index(&self) -> Option<usize> {
        let current = self.current_index?;
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }

        match (self.repeat_mode, current) {
            (RepeatMode::Off, 0) => Some(0),
            (_, 0) => Some(len - 1),
            (_, i) => Some(i - 1),
        }
    }

    /// Moves the cursor forward, returning the new current track.
    pub fn advance(&mut self, reason: AdvanceReason) -> Option<&AudioMetadata> {
        let next = self.next_index(reason)?;
        self.current_index = Some(next);
        self.tracks.get(next)
    }

    /// Moves the cursor back, returning the new current track.
    pub fn go_back(&mut self) -> Option<&AudioMetadata> {
        let previous = self.previous_index()?;
        self.current_index = Some(previous);
        self.tracks.get(previous)
    }

    /// Whether the queue is currently shuffled.
    #[must_use]
    pub fn is_shuffled(&self) -> bool {
        self.original_order.is_some()
    }

    /// Shuffles the queue with the thread-local generator.
    pub fn shuffle(&mut self) {
        self.shuffle_with(&mut rng());
    }

    /// Shuffles the queue with the given generator.
    ///
    /// The current track moves to position 0 and the rest are ordered by
    /// random sort keys. The previous order is kept for `unshuffle`; shuffling
    /// an already shuffled queue reshuffles without losing that order.
    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.tracks.is_empty() {
            return;
        }

        if self.original_order.is_none() {
            self.original_order = Some(self.entry_ids.clone());
        }

        let mut entries: Vec<(u64, AudioMetadata)> = self
            .entry_ids
            .drain(..)
            .zip(self.tracks.drain(..))
            .collect();
        let current = self
            .current_index
            .filter(|&i| i < entries.len())
            .map(|i| entries.remove(i));

        let mut keyed: Vec<(u64, (u64, AudioMetadata))> = entries
            .into_iter()
            .map(|entry| (rng.random::<u64>(), entry))
            .collect();
        keyed.sort_by_key(|(key, _)| *key);

        let (entry_ids, tracks): (Vec<u64>, Vec<AudioMetadata>) = current
            .into_iter()
            .chain(keyed.into_iter().map(|(_, entry)| entry))
            .unzip();
        self.entry_ids = entry_ids;
        self.tracks = tracks;
        self.current_index = Some(0);
    }

    /// Restores the order saved by the first `shuffle`.
    ///
    /// The cursor follows the current track into the restored order.
    pub fn unshuffle(&mut self) {
        let Some(original) = self.original_order.take() else {
            return;
        };

        let current_id = self.current_index.and_then(|i| self.entry_ids.get(i).copied());
        let mut by_id: HashMap<u64, AudioMetadata> = self
            .entry_ids
            .drain(..)
            .zip(self.tracks.drain(..))
            .collect();
        for id in original {
            if let Some(track) = by_id.remove(&id) {
                self.entry_ids.push(id);
                self.tracks.push(track);
            }
        }

        self.current_index = current_id
            .and_then(|id| self.entry_ids.iter().position(|&entry| entry == id))
            .or(if self.tracks.is_empty() { None } else { Some(0) });
    }

    fn fresh_entry_id(&mut self) -> u64 {
        let id = self.next_entry_id;
        self.next_entry_id += 1;
        id
    }
}
