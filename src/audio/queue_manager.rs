//! Playback queue manager with auto-advance support.
//!
//! The `QueueManager` owns the `PlaybackQueue`, turns navigation requests
//! into engine commands and advances on its own when the engine reports a
//! finished track.

use std::sync::Arc;

use {
    parking_lot::Mutex,
    tokio::{
        spawn,
        sync::broadcast::{self, error::RecvError},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use crate::{
    audio::{
        engine::{EngineEvent, PlaybackControl},
        metadata::AudioMetadata,
        queue::{AdvanceReason, PlaybackQueue, RepeatMode},
    },
    error::ResultExt,
};

/// Position after which "previous" restarts the current track.
pub const RESTART_THRESHOLD_MS: u64 = 3_000;

/// Capacity of the queue event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Notifications published by the queue manager.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// Queue contents, order, cursor or modes changed.
    QueueChanged(PlaybackQueue),
    /// A different track became current (or none).
    CurrentTrackChanged(Option<AudioMetadata>),
}

struct Inner<P: PlaybackControl> {
    queue: Mutex<PlaybackQueue>,
    player: P,
    events: broadcast::Sender<QueueEvent>,
}

/// Playback queue manager with auto-advance support.
///
/// Cloning is cheap; clones share the same queue.
pub struct QueueManager<P: PlaybackControl> {
    inner: Arc<Inner<P>>,
}

impl<P: PlaybackControl> Clone for QueueManager<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: PlaybackControl> QueueManager<P> {
    /// Creates a queue manager driving `player`.
    #[must_use]
    pub fn new(player: P) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(PlaybackQueue::new()),
                player,
                events,
            }),
        }
    }

    /// The driven player.
    pub fn player(&self) -> &P {
        &self.inner.player
    }

    /// Starts listening for finished tracks on the current tokio runtime.
    ///
    /// The task ends when the engine event channel closes.
    pub fn start_auto_advance(
        &self,
        mut engine_events: broadcast::Receiver<EngineEvent>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        spawn(async move {
            loop {
                match engine_events.recv().await {
                    Ok(EngineEvent::TrackFinished { path }) => {
                        debug!(path = %path, "Track finished, auto-advancing");
                        manager.handle_track_finished();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Queue manager missed {skipped} engine events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Auto-advance listener stopped");
        })
    }

    /// Replaces the queue, pointing at `start`. Does not start playback.
    pub fn set_queue(&self, tracks: Vec<AudioMetadata>, start: usize) {
        debug!("Setting new queue with {} tracks", tracks.len());
        let current = {
            let mut queue = self.inner.queue.lock();
            queue.set_tracks(tracks, start);
            queue.current().cloned()
        };
        self.broadcast_queue();
        self.emit(QueueEvent::CurrentTrackChanged(current));
    }

    /// Plays the track at `index`. Returns whether something is playing.
    pub fn play_index(&self, index: usize) -> bool {
        if self.inner.queue.lock().select(index).is_none() {
            debug!("Index {index} is outside the queue");
            return false;
        }
        self.play_current()
    }

    /// Plays the current track, skipping unplayable ones.
    pub fn play_current(&self) -> bool {
        let played = self.play_from_current();
        self.broadcast_queue();
        played
    }

    /// Moves to the next track on user request.
    ///
    /// With repeat off the last track stays current and playback continues.
    pub fn next_track(&self) -> bool {
        if self.inner.queue.lock().advance(AdvanceReason::User).is_none() {
            debug!("At end of queue, no next track");
            return false;
        }
        self.play_current()
    }

    /// Moves to the previous track, or restarts the current one when it has
    /// played for more than `RESTART_THRESHOLD_MS`.
    pub fn previous_track(&self) -> bool {
        if self.inner.player.position_ms() > RESTART_THRESHOLD_MS {
            debug!("Restarting current track");
            return self.play_current();
        }
        if self.inner.queue.lock().go_back().is_none() {
            return false;
        }
        self.play_current()
    }

    /// Toggles shuffle, returning the new state.
    pub fn toggle_shuffle(&self) -> bool {
        let enabled = !self.inner.queue.lock().is_shuffled();
        self.set_shuffle(enabled);
        enabled
    }

    /// Enables or disables shuffle. The current track keeps playing.
    pub fn set_shuffle(&self, enabled: bool) {
        {
            let mut queue = self.inner.queue.lock();
            match (enabled, queue.is_shuffled()) {
                (true, false) => queue.shuffle(),
                (false, true) => queue.unshuffle(),
                _ => return,
            }
        }
        info!(enabled, "Shuffle changed");
        self.broadcast_queue();
    }

    /// Sets the repeat mode.
    pub fn set_repeat_mode(&self, mode: RepeatMode) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.repeat_mode == mode {
                return;
            }
            queue.repeat_mode = mode;
        }
        info!(?mode, "Repeat mode changed");
        self.broadcast_queue();
    }

    /// Current repeat mode.
    #[must_use]
    pub fn repeat_mode(&self) -> RepeatMode {
        self.inner.queue.lock().repeat_mode
    }

    /// Whether the queue is shuffled.
    #[must_use]
    pub fn is_shuffled(&self) -> bool {
        self.inner.queue.lock().is_shuffled()
    }

    /// Appends a track to the end of the queue.
    pub fn enqueue(&self, track: AudioMetadata) {
        let became_current = {
            let mut queue = self.inner.queue.lock();
            let was_empty = queue.is_empty();
            queue.append(track);
            was_empty.then(|| queue.current().cloned()).flatten()
        };
        self.broadcast_queue();
        if let Some(current) = became_current {
            self.emit(QueueEvent::CurrentTrackChanged(Some(current)));
        }
    }

    /// Inserts a track right after the current one.
    pub fn play_next(&self, track: AudioMetadata) {
        self.inner.queue.lock().insert_next(track);
        self.broadcast_queue();
    }

    /// Removes the track at `index`.
    ///
    /// Removing the current track plays the one that takes its place, or
    /// stops playback when the queue becomes empty.
    pub fn remove(&self, index: usize) -> Option<AudioMetadata> {
        let (removed, was_current) = {
            let mut queue = self.inner.queue.lock();
            let was_current = queue.current_index == Some(index);
            (queue.remove_at(index)?, was_current)
        };

        if was_current {
            if self.inner.queue.lock().is_empty() {
                self.inner.player.stop().log_absorb("Stopping after removal");
                self.emit(QueueEvent::CurrentTrackChanged(None));
            } else {
                self.play_from_current();
            }
        }
        self.broadcast_queue();
        Some(removed)
    }

    /// Empties the queue and stops playback.
    pub fn clear(&self) {
        self.inner.queue.lock().clear();
        self.inner.player.stop().log_absorb("Stopping on queue clear");
        self.broadcast_queue();
        self.emit(QueueEvent::CurrentTrackChanged(None));
    }

    /// Snapshot of the queue.
    #[must_use]
    pub fn get_queue(&self) -> PlaybackQueue {
        self.inner.queue.lock().clone()
    }

    /// Subscribes to queue events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Handles a natural end of track.
    ///
    /// With repeat off at the end of the queue playback stops and the cursor
    /// stays on the last track.
    pub fn handle_track_finished(&self) {
        if self
            .inner
            .queue
            .lock()
            .advance(AdvanceReason::TrackFinished)
            .is_none()
        {
            info!("Reached end of queue");
            self.inner.player.stop().log_absorb("Stopping at end of queue");
            self.broadcast_queue();
            return;
        }
        self.play_current();
    }

    /// Tries the current track, then the following ones, at most once each.
    fn play_from_current(&self) -> bool {
        let attempts = self.inner.queue.lock().len();

        for _ in 0..attempts {
            let Some(track) = self.inner.queue.lock().current().cloned() else {
                return false;
            };

            let context = format!("Skipping unplayable track {}", track.path);
            if self
                .inner
                .player
                .load_and_play(&track)
                .log_absorb(&context)
                .is_some()
            {
                self.emit(QueueEvent::CurrentTrackChanged(Some(track)));
                return true;
            }

            if self
                .inner
                .queue
                .lock()
                .advance(AdvanceReason::User)
                .is_none()
            {
                break;
            }
        }

        warn!("No playable track left in queue");
        self.inner.player.stop().log_absorb("Stopping after failed loads");
        self.emit(QueueEvent::CurrentTrackChanged(None));
        false
    }

    fn broadcast_queue(&self) {
        let snapshot = self.inner.queue.lock().clone();
        self.emit(QueueEvent::QueueChanged(snapshot));
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}
