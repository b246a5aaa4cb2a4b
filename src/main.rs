//! Sonance - desktop music player core
//!
//! Command line front end: `sonance [--list-devices] [FOLDER|FILE]...`
//!
//! Folders are added to the library and indexed together with the folders
//! already configured. Files are queued directly; without any, the whole
//! library is queued. Playback runs until the queue ends or Ctrl-C.
//! `--list-devices` prints the output devices, marking the configured one.

use std::{
    env::args_os,
    future::Future,
    io::Result as IoResult,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use {
    anyhow::Result,
    tokio::{
        pin, select,
        signal::ctrl_c,
        sync::broadcast::{Receiver, error::RecvError},
        task::spawn_blocking,
        time::{Instant, sleep},
    },
    tracing::{info, warn},
};

use sonance::{
    audio::{
        artwork_cache::ArtworkCache,
        metadata::{AudioMetadata, TagReader, is_supported_audio_file},
        output::{AudioOutput, OutputConfig},
        spectrum::SAMPLING_INTERVAL,
    },
    config::get_database_path,
    error::{ErrorReporter, ResultExt},
    AppState, AppStateEvent, AudioEngine, EngineConfig, LibraryDatabase, LibraryIndexer,
    LoggingConfig, PlaybackState, QueueManager, SettingsManager, init_logging,
};

/// Time a `Stopped` state must persist before the queue counts as finished.
const STOP_GRACE: Duration = Duration::from_millis(300);

const USAGE: &str = "Usage: sonance [--list-devices] [FOLDER|FILE]...";

/// Command line arguments sorted by kind.
#[derive(Debug, Default)]
struct Arguments {
    folders: Vec<PathBuf>,
    files: Vec<PathBuf>,
}

#[derive(Debug)]
enum Command {
    Help,
    ListDevices,
    Play(Arguments),
}

fn parse_arguments() -> Command {
    let mut arguments = Arguments::default();
    for arg in args_os().skip(1) {
        if arg == "-h" || arg == "--help" {
            return Command::Help;
        }
        if arg == "--list-devices" {
            return Command::ListDevices;
        }
        let path = PathBuf::from(arg);
        if path.is_dir() {
            arguments.folders.push(path);
        } else if path.is_file() && is_supported_audio_file(&path) {
            arguments.files.push(path);
        } else {
            warn!("Ignoring argument {}", path.display());
        }
    }
    Command::Play(arguments)
}

async fn read_tracks(files: Vec<PathBuf>) -> Vec<AudioMetadata> {
    let mut tracks = Vec::with_capacity(files.len());
    for file in files {
        let read = spawn_blocking(move || {
            TagReader::read_metadata(&file).unwrap_or_else(|e| {
                warn!("Reading tags of {}: {e}", file.display());
                AudioMetadata::from_path(&file)
            })
        })
        .await;
        if let Some(track) = read.log_absorb("Reading track metadata") {
            tracks.push(track);
        }
    }
    tracks
}

fn absolute(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

fn list_devices(settings: &SettingsManager) -> Result<()> {
    let output = AudioOutput::new(None).add_context("Failed to open audio host")?;
    let configured = settings.get_settings().audio_device.clone();
    for name in output.get_available_devices() {
        let marker = if configured.as_deref() == Some(name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {name}");
    }
    Ok(())
}

/// Why the playback loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaybackExit {
    Interrupted,
    QueueFinished,
    EventsClosed,
}

/// Logs track changes until `interrupted` resolves or playback stays stopped
/// for `STOP_GRACE`.
///
/// The grace timer is armed on every `Stopped` and disarmed by any other
/// state, so the interrupt is honoured while it runs.
async fn watch_playback<F, S>(
    app_events: &mut Receiver<AppStateEvent>,
    interrupted: F,
    is_stopped: S,
) -> PlaybackExit
where
    F: Future<Output = IoResult<()>>,
    S: Fn() -> bool,
{
    pin!(interrupted);
    let grace = sleep(STOP_GRACE);
    pin!(grace);
    let mut grace_armed = false;

    loop {
        select! {
            result = &mut interrupted => {
                if let Err(e) = result {
                    ErrorReporter::warn(&anyhow::Error::from(e), "Listening for Ctrl-C");
                }
                return PlaybackExit::Interrupted;
            }
            () = &mut grace, if grace_armed => {
                grace_armed = false;
                if is_stopped() {
                    return PlaybackExit::QueueFinished;
                }
            }
            event = app_events.recv() => match event {
                Ok(AppStateEvent::CurrentTrackChanged(Some(track))) => {
                    info!("Now playing: {} - {}", track.display_artist(), track.display_title());
                }
                Ok(AppStateEvent::PlaybackStateChanged(PlaybackState::Stopped)) => {
                    grace.as_mut().reset(Instant::now() + STOP_GRACE);
                    grace_armed = true;
                }
                Ok(AppStateEvent::PlaybackStateChanged(_)) => grace_armed = false,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return PlaybackExit::EventsClosed,
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match SettingsManager::new() {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            eprintln!("sonance: failed to load settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    let filter = settings.get_settings().log_filter.clone();
    let _logging = match init_logging(LoggingConfig::default().with_filter(filter)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("sonance: failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match parse_arguments() {
        Command::Help => {
            println!("{USAGE}");
            Ok(())
        }
        Command::ListDevices => list_devices(&settings),
        Command::Play(arguments) => run(settings, arguments).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ErrorReporter::error(&e, "sonance");
            eprintln!("sonance: {}", ErrorReporter::to_user_message(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Arc<SettingsManager>, arguments: Arguments) -> Result<()> {
    let initial = settings.get_settings().clone();

    let database_path = get_database_path();
    let database = LibraryDatabase::open(&database_path)
        .await
        .add_contextf(format!(
            "Failed to open library database {}",
            database_path.display()
        ))?;
    let artwork = Arc::new(ArtworkCache::new(initial.artwork_cache_capacity));
    let indexer =
        LibraryIndexer::new(database.clone(), None).with_artwork_cache(Arc::clone(&artwork));

    let app_state = AppState::new().with_artwork_cache(artwork);
    let _library_binding = app_state.bind_indexer(indexer.subscribe(), database.clone());

    // Configured folders first, then new ones from the command line.
    let mut folders = initial.library_folders.clone();
    for folder in &arguments.folders {
        let folder = absolute(folder);
        if !folders.contains(&folder) {
            folders.push(folder);
        }
    }
    for folder in &folders {
        if let Some(summary) = indexer.index_folder(folder).await.log_absorb(folder) {
            info!(
                "Indexed {folder}: {} songs, {} skipped, {} removed",
                summary.indexed, summary.skipped, summary.removed
            );
        }
    }
    if folders != initial.library_folders {
        settings
            .modify(|s| s.library_folders = folders.clone())
            .add_context("Failed to record library folders")?;
        settings.schedule_save();
    }

    let engine = AudioEngine::new(EngineConfig {
        output: OutputConfig {
            device_name: initial.audio_device.clone(),
            buffer_duration_ms: initial.buffer_duration_ms,
        },
        spectrum_enabled: initial.spectrum_enabled,
        initial_volume: initial.volume,
        ..EngineConfig::default()
    })
    .add_context("Failed to start audio engine")?;

    let queue = QueueManager::new(engine.clone());
    queue.set_repeat_mode(initial.repeat_mode);
    let _engine_binding = app_state.bind_engine(engine.subscribe(), engine.volume());
    let _queue_binding = app_state.bind_queue(queue.subscribe());
    let spectrum_engine = engine.clone();
    let _spectrum_binding =
        app_state.bind_spectrum(move || spectrum_engine.spectrum_bands(), SAMPLING_INTERVAL);
    let auto_advance = queue.start_auto_advance(engine.subscribe());

    let tracks = if arguments.files.is_empty() {
        app_state
            .refresh_library(&database)
            .await
            .log_absorb("Loading library");
        app_state
            .library()
            .songs
            .iter()
            .map(|song| song.to_audio_metadata())
            .collect()
    } else {
        read_tracks(arguments.files).await
    };

    let mut app_events = app_state.subscribe();
    if tracks.is_empty() {
        info!("Nothing to play");
    } else {
        info!("Queued {} tracks", tracks.len());
        queue.set_queue(tracks, 0);
        queue.set_shuffle(initial.shuffle);
        if !queue.play_current() {
            warn!("No playable track in queue");
        }

        let exit = watch_playback(&mut app_events, ctrl_c(), || {
            engine.current_playback_state() == PlaybackState::Stopped
        })
        .await;
        info!(?exit, "Playback ended");
    }

    auto_advance.abort();
    engine.shutdown();

    settings
        .modify(|s| {
            s.volume = engine.volume();
            s.repeat_mode = queue.repeat_mode();
            s.shuffle = queue.is_shuffled();
        })
        .add_context("Failed to record playback settings")?;
    settings.flush().add_context("Failed to save settings")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        future::pending,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering::SeqCst},
        },
        time::Duration,
    };

    use tokio::{
        sync::{broadcast, oneshot},
        time::{Instant, sleep, timeout},
    };

    use sonance::{AppStateEvent, PlaybackState};

    use crate::{PlaybackExit, STOP_GRACE, watch_playback};

    #[tokio::test]
    async fn test_interrupt_is_handled_during_stop_grace() {
        let (events_tx, mut events) = broadcast::channel(8);
        let (interrupt_tx, interrupt_rx) = oneshot::channel::<()>();

        let started = Instant::now();
        let watcher = tokio::spawn(async move {
            watch_playback(
                &mut events,
                async move {
                    let _ = interrupt_rx.await;
                    Ok(())
                },
                || true,
            )
            .await
        });

        events_tx
            .send(AppStateEvent::PlaybackStateChanged(PlaybackState::Stopped))
            .unwrap();
        sleep(Duration::from_millis(20)).await;
        interrupt_tx.send(()).unwrap();

        let exit = timeout(STOP_GRACE, watcher).await.unwrap().unwrap();
        assert_eq!(exit, PlaybackExit::Interrupted);
        assert!(started.elapsed() < STOP_GRACE);
    }

    #[tokio::test]
    async fn test_lasting_stop_finishes_the_queue() {
        let (events_tx, mut events) = broadcast::channel(8);
        events_tx
            .send(AppStateEvent::PlaybackStateChanged(PlaybackState::Stopped))
            .unwrap();

        let exit = timeout(
            STOP_GRACE * 3,
            watch_playback(&mut events, pending(), || true),
        )
        .await
        .unwrap();
        assert_eq!(exit, PlaybackExit::QueueFinished);
    }

    #[tokio::test]
    async fn test_track_change_cancels_stop_grace() {
        let (events_tx, mut events) = broadcast::channel(8);
        let stopped = Arc::new(AtomicBool::new(true));
        let (interrupt_tx, interrupt_rx) = oneshot::channel::<()>();

        let is_stopped = Arc::clone(&stopped);
        let watcher = tokio::spawn(async move {
            watch_playback(
                &mut events,
                async move {
                    let _ = interrupt_rx.await;
                    Ok(())
                },
                move || is_stopped.load(SeqCst),
            )
            .await
        });

        events_tx
            .send(AppStateEvent::PlaybackStateChanged(PlaybackState::Stopped))
            .unwrap();
        stopped.store(false, SeqCst);
        events_tx
            .send(AppStateEvent::PlaybackStateChanged(PlaybackState::Ready))
            .unwrap();
        sleep(STOP_GRACE * 2).await;
        assert!(!watcher.is_finished());

        interrupt_tx.send(()).unwrap();
        assert_eq!(watcher.await.unwrap(), PlaybackExit::Interrupted);
    }
}
