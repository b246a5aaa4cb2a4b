//! Global application state with reactive update mechanisms.
//!
//! `AppState` is the view-model layer: it mirrors engine, queue and indexer
//! events into bindable snapshots and rebroadcasts them as `AppStateEvent`s
//! for whatever UI sits on top.

use std::{sync::Arc, time::Duration};

use {
    parking_lot::RwLock,
    tokio::{
        spawn,
        sync::broadcast::{Receiver, Sender, channel, error::RecvError},
        task::{JoinHandle, spawn_blocking},
        time::{MissedTickBehavior::Skip, interval},
    },
    tracing::{debug, warn},
};

use crate::{
    audio::{
        artwork_cache::{ArtworkCache, CachedArtwork},
        engine::{EngineEvent, PlaybackControl, PlaybackState},
        metadata::{AudioMetadata, TagReader},
        queue::RepeatMode,
        queue_manager::{QueueEvent, QueueManager},
        spectrum::BAND_COUNT,
    },
    error::{LibraryError, ResultExt},
    library::{
        database::LibraryDatabase,
        indexer::{IndexSummary, IndexerEvent},
        models::{Album, Artist, FolderRecord, PlaylistRecord, SongRecord},
    },
};

/// Bindable playback properties.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    /// Engine playback state.
    pub state: PlaybackState,
    /// Track the queue points at.
    pub current_track: Option<AudioMetadata>,
    /// Embedded artwork of the current track, loaded in the background.
    pub artwork: CachedArtwork,
    /// Position in milliseconds.
    pub position_ms: u64,
    /// Duration of the current track in milliseconds.
    pub duration_ms: u64,
    /// Linear volume in [0, 1].
    pub volume: f32,
    /// Queue repeat mode.
    pub repeat_mode: RepeatMode,
    /// Whether the queue is shuffled.
    pub shuffle: bool,
    /// Number of tracks in the queue.
    pub queue_length: usize,
    /// Latest spectrum band levels.
    pub spectrum: Vec<f32>,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            state: PlaybackState::Stopped,
            current_track: None,
            artwork: None,
            position_ms: 0,
            duration_ms: 0,
            volume: 1.0,
            repeat_mode: RepeatMode::Off,
            shuffle: false,
            queue_length: 0,
            spectrum: vec![0.0; BAND_COUNT],
        }
    }
}

/// Bindable library contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LibrarySnapshot {
    /// Registered folders.
    pub folders: Vec<FolderRecord>,
    /// Every song.
    pub songs: Vec<SongRecord>,
    /// All artists.
    pub artists: Vec<Artist>,
    /// All albums.
    pub albums: Vec<Album>,
    /// All playlists.
    pub playlists: Vec<PlaylistRecord>,
}

/// Application state change events.
#[derive(Debug, Clone, PartialEq)]
pub enum AppStateEvent {
    /// Playback state changed.
    PlaybackStateChanged(PlaybackState),
    /// Current track changed.
    CurrentTrackChanged(Option<AudioMetadata>),
    /// Artwork of the current track finished loading.
    ArtworkChanged(CachedArtwork),
    /// Position or duration changed.
    PositionChanged { position_ms: u64, duration_ms: u64 },
    /// Volume changed.
    VolumeChanged(f32),
    /// Queue length or modes changed.
    QueueChanged {
        length: usize,
        repeat_mode: RepeatMode,
        shuffle: bool,
    },
    /// The library snapshot was reloaded.
    LibraryChanged,
    /// A folder finished indexing.
    IndexingFinished {
        folder: String,
        summary: IndexSummary,
    },
}

/// Central state container with thread-safe access.
///
/// Cloning is cheap; clones share the same snapshots.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Current playback properties.
    playback: Arc<RwLock<PlaybackSnapshot>>,
    /// Current library contents.
    library: Arc<RwLock<LibrarySnapshot>>,
    /// Broadcast channel for state change notifications.
    state_tx: Sender<AppStateEvent>,
    /// Source of current-track artwork; without one no artwork is loaded.
    artwork_cache: Option<Arc<ArtworkCache>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Creates a new application state instance.
    pub fn new() -> Self {
        let (state_tx, _) = channel(64);
        Self {
            playback: Arc::new(RwLock::new(PlaybackSnapshot::default())),
            library: Arc::new(RwLock::new(LibrarySnapshot::default())),
            state_tx,
            artwork_cache: None,
        }
    }

    /// Loads current-track artwork through `cache`.
    #[must_use]
    pub fn with_artwork_cache(mut self, cache: Arc<ArtworkCache>) -> Self {
        self.artwork_cache = Some(cache);
        self
    }

    /// Subscribes to application state changes.
    pub fn subscribe(&self) -> Receiver<AppStateEvent> {
        self.state_tx.subscribe()
    }

    /// Gets the current playback properties.
    pub fn playback(&self) -> PlaybackSnapshot {
        self.playback.read().clone()
    }

    /// Gets the current library contents.
    pub fn library(&self) -> LibrarySnapshot {
        self.library.read().clone()
    }

    /// Mirrors engine events into the playback snapshot.
    ///
    /// `volume` is the engine's volume at bind time; later changes arrive as
    /// events.
    pub fn bind_engine(&self, events: Receiver<EngineEvent>, volume: f32) -> JoinHandle<()> {
        self.apply_engine_event(EngineEvent::VolumeChanged(volume));
        let state = self.clone();
        listen(events, "engine", move |event| state.apply_engine_event(event))
    }

    /// Mirrors queue events into the playback snapshot.
    pub fn bind_queue(&self, events: Receiver<QueueEvent>) -> JoinHandle<()> {
        let state = self.clone();
        listen(events, "queue", move |event| state.apply_queue_event(event))
    }

    /// Reloads the library snapshot whenever the indexer changes the library.
    pub fn bind_indexer(
        &self,
        mut events: Receiver<IndexerEvent>,
        database: LibraryDatabase,
    ) -> JoinHandle<()> {
        let state = self.clone();
        spawn(async move {
            loop {
                match events.recv().await {
                    Ok(IndexerEvent::LibraryChanged) | Err(RecvError::Lagged(_)) => {
                        state
                            .refresh_library(&database)
                            .await
                            .log_absorb("Refreshing library snapshot");
                    }
                    Ok(IndexerEvent::FolderIndexed { folder, summary }) => {
                        state.emit(AppStateEvent::IndexingFinished { folder, summary });
                    }
                    Ok(IndexerEvent::FolderRemoved { folder }) => {
                        debug!(folder = %folder, "Folder removed from library");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Samples spectrum levels at `cadence` while playing.
    ///
    /// Levels are zeroed once playback leaves the playing state.
    pub fn bind_spectrum<F>(&self, sampler: F, cadence: Duration) -> JoinHandle<()>
    where
        F: Fn() -> Vec<f32> + Send + 'static,
    {
        let playback = Arc::clone(&self.playback);
        spawn(async move {
            let mut ticker = interval(cadence);
            ticker.set_missed_tick_behavior(Skip);
            loop {
                ticker.tick().await;
                let playing = playback.read().state == PlaybackState::Playing;
                if playing {
                    let bands = sampler();
                    playback.write().spectrum = bands;
                } else {
                    let mut snapshot = playback.write();
                    if snapshot.spectrum.iter().any(|&level| level > 0.0) {
                        snapshot.spectrum = vec![0.0; BAND_COUNT];
                    }
                }
            }
        })
    }

    /// Reloads folders, songs, artists, albums and playlists.
    ///
    /// # Errors
    ///
    /// Returns `LibraryError` if a query fails; the snapshot is left as is.
    pub async fn refresh_library(&self, database: &LibraryDatabase) -> Result<(), LibraryError> {
        let snapshot = LibrarySnapshot {
            folders: database.get_folders().await?,
            songs: database.get_songs().await?,
            artists: database.get_artists().await?,
            albums: database.get_albums().await?,
            playlists: database.get_playlists().await?,
        };
        debug!(songs = snapshot.songs.len(), "Library snapshot refreshed");

        *self.library.write() = snapshot;
        self.emit(AppStateEvent::LibraryChanged);
        Ok(())
    }

    /// Queues `songs` and plays the one at `start`.
    pub fn play_songs<P: PlaybackControl>(
        &self,
        queue: &QueueManager<P>,
        songs: &[SongRecord],
        start: usize,
    ) -> bool {
        let tracks = songs.iter().map(SongRecord::to_audio_metadata).collect();
        queue.set_queue(tracks, start);
        queue.play_index(start)
    }

    fn apply_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::StateChanged(new_state) => {
                self.playback.write().state = new_state;
                self.emit(AppStateEvent::PlaybackStateChanged(new_state));
            }
            EngineEvent::PositionChanged {
                position_ms,
                duration_ms,
            } => {
                {
                    let mut playback = self.playback.write();
                    playback.position_ms = position_ms;
                    playback.duration_ms = duration_ms;
                }
                self.emit(AppStateEvent::PositionChanged {
                    position_ms,
                    duration_ms,
                });
            }
            EngineEvent::VolumeChanged(volume) => {
                {
                    let mut playback = self.playback.write();
                    if playback.volume == volume {
                        return;
                    }
                    playback.volume = volume;
                }
                self.emit(AppStateEvent::VolumeChanged(volume));
            }
            EngineEvent::TrackFinished { .. } => {}
        }
    }

    fn apply_queue_event(&self, event: QueueEvent) {
        match event {
            QueueEvent::QueueChanged(queue) => {
                let (length, repeat_mode, shuffle) =
                    (queue.len(), queue.repeat_mode, queue.is_shuffled());
                {
                    let mut playback = self.playback.write();
                    playback.queue_length = length;
                    playback.repeat_mode = repeat_mode;
                    playback.shuffle = shuffle;
                }
                self.emit(AppStateEvent::QueueChanged {
                    length,
                    repeat_mode,
                    shuffle,
                });
            }
            QueueEvent::CurrentTrackChanged(track) => {
                {
                    let mut playback = self.playback.write();
                    if playback.current_track == track {
                        return;
                    }
                    playback.position_ms = 0;
                    playback.duration_ms = track.as_ref().map_or(0, |t| t.duration_ms);
                    playback.current_track = track.clone();
                    playback.artwork = None;
                }
                if let Some(track) = &track {
                    self.load_artwork(track.path.clone());
                }
                self.emit(AppStateEvent::CurrentTrackChanged(track));
            }
        }
    }

    /// Fetches artwork for `path` on a blocking task and publishes it if
    /// `path` is still the current track.
    fn load_artwork(&self, path: String) {
        let Some(cache) = self.artwork_cache.clone() else {
            return;
        };
        let state = self.clone();
        spawn_blocking(move || {
            let artwork = cache.get_or_load(&path, || TagReader::read_artwork(&path));
            let changed = {
                let mut playback = state.playback.write();
                let current = playback
                    .current_track
                    .as_ref()
                    .is_some_and(|track| track.path == path);
                if current && playback.artwork != artwork {
                    playback.artwork = artwork.clone();
                    true
                } else {
                    false
                }
            };
            if changed {
                state.emit(AppStateEvent::ArtworkChanged(artwork));
            }
        });
    }

    fn emit(&self, event: AppStateEvent) {
        // No subscribers is fine.
        let _ = self.state_tx.send(event);
    }
}

/// Applies every event from `events` until the channel closes.
fn listen<E, F>(mut events: Receiver<E>, source: &'static str, apply: F) -> JoinHandle<()>
where
    E: Clone + Send + 'static,
    F: Fn(E) + Send + 'static,
{
    spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => apply(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("App state missed {skipped} {source} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Stopped listening to {source} events");
    })
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use {
        parking_lot::Mutex,
        tempfile::tempdir,
        tokio::{sync::broadcast, time::{sleep, timeout}},
    };

    use crate::{
        audio::{
            artwork_cache::ArtworkCache,
            engine::{EngineEvent, PlaybackControl, PlaybackState},
            metadata::AudioMetadata,
            queue::RepeatMode,
            queue_manager::QueueManager,
        },
        error::AudioError,
        library::{
            database::LibraryDatabase,
            indexer::{IndexSummary, IndexerEvent},
            models::ScannedSong,
        },
        state::app_state::{AppState, AppStateEvent},
        test_support::write_wav,
    };

    #[derive(Default)]
    struct SilentPlayer {
        played: Mutex<Vec<String>>,
    }

    impl PlaybackControl for SilentPlayer {
        fn load_and_play(&self, track: &AudioMetadata) -> Result<(), AudioError> {
            self.played.lock().push(track.path.clone());
            Ok(())
        }

        fn stop(&self) -> Result<(), AudioError> {
            Ok(())
        }

        fn position_ms(&self) -> u64 {
            0
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        timeout(Duration::from_secs(1), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[test]
    fn test_app_state_creation() {
        let state = AppState::new();
        let playback = state.playback();
        assert_eq!(playback.state, PlaybackState::Stopped);
        assert!(playback.current_track.is_none());
        assert!(playback.spectrum.iter().all(|&level| level == 0.0));
        assert!(state.library().songs.is_empty());
    }

    #[tokio::test]
    async fn test_engine_events_update_playback() {
        let state = AppState::new();
        let mut app_events = state.subscribe();
        let (engine_tx, engine_rx) = broadcast::channel(8);
        let handle = state.bind_engine(engine_rx, 1.0);

        engine_tx
            .send(EngineEvent::StateChanged(PlaybackState::Playing))
            .unwrap();
        engine_tx
            .send(EngineEvent::PositionChanged {
                position_ms: 1500,
                duration_ms: 3000,
            })
            .unwrap();
        engine_tx.send(EngineEvent::VolumeChanged(0.4)).unwrap();
        drop(engine_tx);
        handle.await.unwrap();

        let playback = state.playback();
        assert_eq!(playback.state, PlaybackState::Playing);
        assert_eq!(playback.position_ms, 1500);
        assert_eq!(playback.duration_ms, 3000);
        assert_eq!(playback.volume, 0.4);
        assert_eq!(
            app_events.try_recv(),
            Ok(AppStateEvent::PlaybackStateChanged(PlaybackState::Playing))
        );
    }

    #[tokio::test]
    async fn test_queue_events_update_playback() {
        let state = AppState::new();
        let manager = QueueManager::new(SilentPlayer::default());
        let handle = state.bind_queue(manager.subscribe());

        let tracks: Vec<AudioMetadata> = (0..3)
            .map(|i| AudioMetadata {
                duration_ms: 60_000,
                ..AudioMetadata::from_path(format!("/music/{i}.flac"))
            })
            .collect();
        manager.set_queue(tracks, 1);
        manager.set_repeat_mode(RepeatMode::All);

        wait_for(|| state.playback().repeat_mode == RepeatMode::All).await;
        let playback = state.playback();
        assert_eq!(playback.queue_length, 3);
        assert_eq!(
            playback.current_track.map(|t| t.path),
            Some("/music/1.flac".to_string())
        );
        assert_eq!(playback.duration_ms, 60_000);

        drop(manager);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_indexer_events_refresh_library() {
        let database = LibraryDatabase::in_memory().await.unwrap();
        let folder = database.add_folder("/music").await.unwrap();
        database
            .upsert_songs(
                folder.id,
                &[ScannedSong {
                    metadata: AudioMetadata::from_path("/music/a.flac"),
                    ..ScannedSong::default()
                }],
            )
            .await
            .unwrap();

        let state = AppState::new();
        let mut app_events = state.subscribe();
        let (indexer_tx, indexer_rx) = broadcast::channel(8);
        let handle = state.bind_indexer(indexer_rx, database);

        let summary = IndexSummary {
            indexed: 1,
            ..IndexSummary::default()
        };
        indexer_tx
            .send(IndexerEvent::FolderIndexed {
                folder: "/music".to_string(),
                summary,
            })
            .unwrap();
        indexer_tx.send(IndexerEvent::LibraryChanged).unwrap();
        drop(indexer_tx);
        handle.await.unwrap();

        let library = state.library();
        assert_eq!(library.folders.len(), 1);
        assert_eq!(library.songs.len(), 1);
        assert_eq!(library.artists.len(), 1);
        assert_eq!(
            app_events.try_recv(),
            Ok(AppStateEvent::IndexingFinished {
                folder: "/music".to_string(),
                summary
            })
        );
        assert_eq!(app_events.try_recv(), Ok(AppStateEvent::LibraryChanged));
    }

    #[tokio::test]
    async fn test_play_songs_relays_to_queue() {
        let database = LibraryDatabase::in_memory().await.unwrap();
        let folder = database.add_folder("/music").await.unwrap();
        let songs: Vec<ScannedSong> = ["a", "b"]
            .iter()
            .map(|name| ScannedSong {
                metadata: AudioMetadata::from_path(format!("/music/{name}.flac")),
                ..ScannedSong::default()
            })
            .collect();
        database.upsert_songs(folder.id, &songs).await.unwrap();

        let state = AppState::new();
        state.refresh_library(&database).await.unwrap();
        let manager = QueueManager::new(SilentPlayer::default());

        assert!(state.play_songs(&manager, &state.library().songs, 1));
        assert_eq!(*manager.player().played.lock(), vec!["/music/b.flac"]);
    }

    #[tokio::test]
    async fn test_spectrum_resets_when_not_playing() {
        let state = AppState::new();
        let (engine_tx, engine_rx) = broadcast::channel(8);
        let _engine = state.bind_engine(engine_rx, 1.0);
        let _spectrum = state.bind_spectrum(|| vec![0.5; 4], Duration::from_millis(5));

        engine_tx
            .send(EngineEvent::StateChanged(PlaybackState::Playing))
            .unwrap();
        wait_for(|| state.playback().spectrum == vec![0.5; 4]).await;

        engine_tx
            .send(EngineEvent::StateChanged(PlaybackState::Paused))
            .unwrap();
        wait_for(|| state.playback().spectrum.iter().all(|&level| level == 0.0)).await;
    }

    #[tokio::test]
    async fn test_bind_engine_seeds_volume() {
        let state = AppState::new();
        let mut app_events = state.subscribe();
        let (engine_tx, engine_rx) = broadcast::channel::<EngineEvent>(8);
        let handle = state.bind_engine(engine_rx, 0.7);

        assert_eq!(state.playback().volume, 0.7);
        assert_eq!(app_events.try_recv(), Ok(AppStateEvent::VolumeChanged(0.7)));

        drop(engine_tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_current_track_artwork_comes_from_cache() {
        let cache = Arc::new(ArtworkCache::new(4));
        cache.insert("/music/1.flac", Some(Arc::new(vec![0xFF, 0xD8])));

        let state = AppState::new().with_artwork_cache(Arc::clone(&cache));
        let manager = QueueManager::new(SilentPlayer::default());
        let _queue = state.bind_queue(manager.subscribe());

        let tracks = (0..3)
            .map(|i| AudioMetadata::from_path(format!("/music/{i}.flac")))
            .collect();
        manager.set_queue(tracks, 1);

        wait_for(|| state.playback().artwork.is_some()).await;
        assert_eq!(
            state.playback().artwork.as_deref(),
            Some(&vec![0xFF, 0xD8])
        );

        manager.set_queue(vec![AudioMetadata::from_path("/music/2.flac")], 0);
        wait_for(|| {
            state
                .playback()
                .current_track
                .is_some_and(|t| t.path == "/music/2.flac")
        })
        .await;
        assert!(state.playback().artwork.is_none());
    }

    #[tokio::test]
    async fn test_missing_artwork_is_cached_as_none() {
        let dir = tempdir().unwrap();
        let song = dir.path().join("tone.wav");
        write_wav(&song, 8_000, 1, 800).unwrap();
        let path = song.to_string_lossy().to_string();

        let cache = Arc::new(ArtworkCache::new(4));
        let state = AppState::new().with_artwork_cache(Arc::clone(&cache));
        let manager = QueueManager::new(SilentPlayer::default());
        let _queue = state.bind_queue(manager.subscribe());

        manager.set_queue(vec![AudioMetadata::from_path(&path)], 0);
        wait_for(|| cache.get(&path).is_some()).await;
        assert_eq!(cache.get(&path), Some(None));
        assert!(state.playback().artwork.is_none());
    }
}
