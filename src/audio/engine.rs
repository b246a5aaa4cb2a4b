//! Audio playback engine orchestrator.
//!
//! This module provides the `AudioEngine` handle that coordinates the
//! decoder, resampler and output pipeline. The pipeline and all playback
//! state transitions belong to a single control loop running on its own
//! thread; the handle only validates requests and forwards them.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{
            AtomicBool, AtomicU32, AtomicU64,
            Ordering::SeqCst,
        },
    },
    thread::{Builder as ThreadBuilder, JoinHandle},
    time::{Duration, Instant},
};

use {
    async_channel::{Receiver, Sender, unbounded},
    cpal::{Stream, traits::StreamTrait},
    parking_lot::RwLock,
    rtrb::RingBuffer,
    serde::{Deserialize, Serialize},
    tokio::{
        runtime::{Builder, Handle},
        select,
        sync::broadcast,
        task::spawn_blocking,
        time::{MissedTickBehavior, interval, timeout},
    },
    tracing::{debug, error, info, warn},
};

use crate::{
    audio::{
        decoder::{AudioDecoder, AudioFormat, AudioProducer, DecoderError},
        metadata::{AudioMetadata, TagReader},
        output::{AudioOutput, CallbackContext, OutputConfig, OutputMonitor},
        resampler::ResamplingAudioConsumer,
        spectrum::SpectrumAnalyzer,
        volume::apply_volume_curve,
    },
    error::AudioError,
};

/// Interval of the position poller while playing.
pub const POSITION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default slack when comparing position against duration.
pub const DEFAULT_END_TOLERANCE_MS: u64 = 100;

/// How long end-of-track detection stays off after a seek.
pub const SEEK_SUPPRESSION: Duration = Duration::from_millis(500);

/// Capacity of the broadcast event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Smallest decode ring buffer, in samples.
const MIN_RING_CAPACITY: usize = 4096;

/// Time allowed for the decoder thread to exit on teardown.
const DECODER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Current playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    /// No track is loaded or playing.
    Stopped,
    /// Track is loaded and ready to play.
    Ready,
    /// Track is currently playing.
    Playing,
    /// Track is paused.
    Paused,
    /// The pipeline is being built.
    Buffering,
}

/// Notifications published by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The playback state changed.
    StateChanged(PlaybackState),
    /// The current track played to its end on its own.
    TrackFinished {
        /// Path of the finished track.
        path: String,
    },
    /// Periodic position update while playing, and after seeks.
    PositionChanged {
        /// Position in milliseconds.
        position_ms: u64,
        /// Track duration in milliseconds.
        duration_ms: u64,
    },
    /// The linear volume changed.
    VolumeChanged(f32),
}

/// Information about the currently loaded track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Path to the audio file.
    pub path: String,
    /// Extracted metadata.
    pub metadata: AudioMetadata,
    /// Audio format information.
    pub format: AudioFormat,
    /// Duration in milliseconds.
    pub duration_ms: u64,
}

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Output device and buffering.
    pub output: OutputConfig,
    /// Slack for end-of-track detection.
    pub end_tolerance_ms: u64,
    /// Whether the spectrum visualizer samples while playing.
    pub spectrum_enabled: bool,
    /// Initial linear volume.
    pub initial_volume: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            end_tolerance_ms: DEFAULT_END_TOLERANCE_MS,
            spectrum_enabled: true,
            initial_volume: 1.0,
        }
    }
}

/// Decides when the current track has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackEndDetector {
    /// Allowed gap between position and duration.
    pub tolerance_ms: u64,
}

impl Default for TrackEndDetector {
    fn default() -> Self {
        Self {
            tolerance_ms: DEFAULT_END_TOLERANCE_MS,
        }
    }
}

impl TrackEndDetector {
    /// Whether playback reached the end of the track.
    ///
    /// True when the position is within the tolerance of a known duration, or
    /// when the decoder finished and the output drained its buffer.
    #[must_use]
    pub fn is_finished(&self, position_ms: u64, duration_ms: u64, drained: bool) -> bool {
        drained || (duration_ms > 0 && position_ms.saturating_add(self.tolerance_ms) >= duration_ms)
    }
}

/// Outcome of one end-of-track check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndCheck {
    /// Keep playing.
    Continue,
    /// The track played to its end.
    Finished,
    /// The track ended while a user transition was in progress.
    Interrupted,
}

/// End-of-track bookkeeping for the position poller.
///
/// Reports each track's end once, and never inside the seek suppression
/// window.
#[derive(Debug, Clone)]
struct EndWatch {
    detector: TrackEndDetector,
    suppress_until: Option<Instant>,
    ended: bool,
}

impl EndWatch {
    fn new(detector: TrackEndDetector) -> Self {
        Self {
            detector,
            suppress_until: None,
            ended: false,
        }
    }

    /// Forgets everything about the previous track.
    fn reset(&mut self) {
        self.suppress_until = None;
        self.ended = false;
    }

    /// Arms detection for a freshly started stream.
    fn rearm(&mut self) {
        self.ended = false;
    }

    /// Starts or restarts the seek suppression window at `now`.
    fn suppress(&mut self, now: Instant) {
        self.suppress_until = Some(now + SEEK_SUPPRESSION);
    }

    fn check(
        &mut self,
        position_ms: u64,
        duration_ms: u64,
        drained: bool,
        intentional: bool,
        now: Instant,
    ) -> EndCheck {
        if self.ended {
            return EndCheck::Continue;
        }
        if let Some(until) = self.suppress_until {
            if now < until {
                return EndCheck::Continue;
            }
            self.suppress_until = None;
        }
        if !self.detector.is_finished(position_ms, duration_ms, drained) {
            return EndCheck::Continue;
        }

        self.ended = true;
        if intentional {
            EndCheck::Interrupted
        } else {
            EndCheck::Finished
        }
    }
}

/// Seam between queue management and the playback pipeline.
pub trait PlaybackControl: Send + Sync + 'static {
    /// Loads a track and starts playing it.
    ///
    /// # Errors
    ///
    /// Returns `AudioError` if the track cannot be opened or the command
    /// cannot be delivered.
    fn load_and_play(&self, track: &AudioMetadata) -> Result<(), AudioError>;

    /// Stops playback on user request.
    ///
    /// # Errors
    ///
    /// Returns `AudioError` if the command cannot be delivered.
    fn stop(&self) -> Result<(), AudioError>;

    /// Current playback position in milliseconds.
    fn position_ms(&self) -> u64;
}

/// Internal control messages for the audio engine.
#[derive(Debug)]
enum ControlMessage {
    /// Tear down the pipeline for a newly loaded track.
    Load,
    /// Start playback.
    Play,
    /// Pause playback.
    Pause,
    /// Resume playback.
    Resume,
    /// Stop playback, unloading the track only if no load happened since
    /// the request was made.
    Stop { generation: u64 },
    /// Seek to specified position in milliseconds.
    Seek(u64),
    /// Exit the control loop.
    Shutdown,
}

/// State shared between the handle and the control loop.
struct EngineShared {
    state: RwLock<PlaybackState>,
    current_track: RwLock<Option<TrackInfo>>,
    /// Bumped by every `load_track`.
    load_generation: AtomicU64,
    position_ms: AtomicU64,
    /// Linear volume as `f32` bits.
    volume: AtomicU32,
    /// Curved output gain as `f32` bits, read by the output callback.
    gain: Arc<AtomicU32>,
    /// Set by user-initiated transitions so the current track ending does
    /// not count as a natural finish.
    intentional_stop: AtomicBool,
    spectrum_enabled: AtomicBool,
    spectrum: SpectrumAnalyzer,
}

/// Main audio playback engine handle.
///
/// Cloning is cheap; every clone talks to the same control loop.
#[derive(Clone)]
pub struct AudioEngine {
    shared: Arc<EngineShared>,
    control_tx: Sender<ControlMessage>,
    events: broadcast::Sender<EngineEvent>,
}

impl AudioEngine {
    /// Creates a new audio engine and starts its control loop thread.
    ///
    /// No output device is opened until playback starts.
    ///
    /// # Errors
    ///
    /// Returns `AudioError` if the control thread cannot be spawned.
    pub fn new(config: EngineConfig) -> Result<Self, AudioError> {
        let volume = clamp_volume(config.initial_volume);
        let shared = Arc::new(EngineShared {
            state: RwLock::new(PlaybackState::Stopped),
            current_track: RwLock::new(None),
            load_generation: AtomicU64::new(0),
            position_ms: AtomicU64::new(0),
            volume: AtomicU32::new(volume.to_bits()),
            gain: Arc::new(AtomicU32::new(apply_volume_curve(volume).to_bits())),
            intentional_stop: AtomicBool::new(false),
            spectrum_enabled: AtomicBool::new(config.spectrum_enabled),
            spectrum: SpectrumAnalyzer::new(),
        });
        let (control_tx, control_rx) = unbounded();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let loop_shared = Arc::clone(&shared);
        let loop_events = events.clone();
        let detector = TrackEndDetector {
            tolerance_ms: config.end_tolerance_ms,
        };
        let output_config = config.output;

        // The loop owns a `cpal::Stream`, so it is built on its own thread.
        ThreadBuilder::new()
            .name("sonance-engine".to_string())
            .spawn(move || {
                ControlLoop {
                    shared: loop_shared,
                    events: loop_events,
                    end_watch: EndWatch::new(detector),
                    output_config,
                    active: None,
                }
                .run(control_rx);
            })
            .map_err(|e| AudioError::InvalidOperation {
                reason: format!("Failed to spawn engine thread: {e}"),
            })?;

        Ok(AudioEngine {
            shared,
            control_tx,
            events,
        })
    }

    /// Loads a track for playback without starting it.
    ///
    /// The file is probed synchronously so unplayable files fail here.
    /// Whatever was playing is stopped without a `TrackFinished` event.
    ///
    /// # Errors
    ///
    /// Returns `AudioError` if the file cannot be decoded or the engine is
    /// shut down.
    pub fn load_track<P: AsRef<Path>>(&self, track_path: P) -> Result<TrackInfo, AudioError> {
        let path = track_path.as_ref();

        let metadata = TagReader::read_metadata(path).unwrap_or_else(|e| {
            debug!("No tags for {}: {e}", path.display());
            AudioMetadata::from_path(path)
        });
        let decoder = AudioDecoder::new(path)?;
        let duration_ms = decoder.duration_ms().unwrap_or(metadata.duration_ms);

        let track_info = TrackInfo {
            path: path.to_string_lossy().to_string(),
            metadata,
            format: decoder.format.clone(),
            duration_ms,
        };

        self.shared.intentional_stop.store(true, SeqCst);
        {
            let mut current = self.shared.current_track.write();
            self.shared.load_generation.fetch_add(1, SeqCst);
            *current = Some(track_info.clone());
        }
        self.shared.position_ms.store(0, SeqCst);
        self.send(ControlMessage::Load)?;

        Ok(track_info)
    }

    /// Starts playback of the currently loaded track.
    ///
    /// # Errors
    ///
    /// Returns `AudioError::NoTrackLoaded` if nothing is loaded.
    pub fn play(&self) -> Result<(), AudioError> {
        if self.shared.current_track.read().is_none() {
            return Err(AudioError::NoTrackLoaded);
        }
        self.send(ControlMessage::Play)
    }

    /// Pauses the current playback.
    ///
    /// # Errors
    ///
    /// Returns `AudioError::InvalidOperation` when nothing is playing.
    pub fn pause(&self) -> Result<(), AudioError> {
        let state = self.current_playback_state();
        if matches!(state, PlaybackState::Stopped | PlaybackState::Ready) {
            return Err(AudioError::InvalidOperation {
                reason: "Cannot pause when not playing".to_string(),
            });
        }
        self.send(ControlMessage::Pause)
    }

    /// Resumes playback after pausing.
    ///
    /// # Errors
    ///
    /// Returns `AudioError::InvalidOperation` when not paused.
    pub fn resume(&self) -> Result<(), AudioError> {
        if self.current_playback_state() != PlaybackState::Paused {
            return Err(AudioError::InvalidOperation {
                reason: "Cannot resume when not paused".to_string(),
            });
        }
        self.send(ControlMessage::Resume)
    }

    /// Stops playback and unloads the current track.
    ///
    /// # Errors
    ///
    /// Returns `AudioError::EngineShutDown` if the control loop is gone.
    pub fn stop(&self) -> Result<(), AudioError> {
        self.shared.intentional_stop.store(true, SeqCst);
        let generation = self.shared.load_generation.load(SeqCst);
        self.send(ControlMessage::Stop { generation })
    }

    /// Seeks to the specified position in the current track.
    ///
    /// # Errors
    ///
    /// Returns `AudioError::NoTrackLoaded` if nothing is loaded.
    pub fn seek(&self, position_ms: u64) -> Result<(), AudioError> {
        if self.shared.current_track.read().is_none() {
            return Err(AudioError::NoTrackLoaded);
        }
        self.send(ControlMessage::Seek(position_ms))
    }

    /// Sets the linear volume in [0, 1]; the output gain follows the volume
    /// curve.
    pub fn set_volume(&self, linear: f32) {
        let volume = clamp_volume(linear);
        self.shared.volume.store(volume.to_bits(), SeqCst);
        self.shared
            .gain
            .store(apply_volume_curve(volume).to_bits(), SeqCst);
        let _ = self.events.send(EngineEvent::VolumeChanged(volume));
    }

    /// Current linear volume.
    #[must_use]
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.shared.volume.load(SeqCst))
    }

    /// Enables or disables spectrum sampling.
    pub fn set_spectrum_enabled(&self, enabled: bool) {
        self.shared.spectrum_enabled.store(enabled, SeqCst);
        if !enabled {
            self.shared.spectrum.stop();
        }
    }

    /// Latest spectrum band levels.
    #[must_use]
    pub fn spectrum_bands(&self) -> Vec<f32> {
        self.shared.spectrum.bands()
    }

    /// Gets the current playback state.
    #[must_use]
    pub fn current_playback_state(&self) -> PlaybackState {
        *self.shared.state.read()
    }

    /// Gets information about the currently loaded track.
    #[must_use]
    pub fn current_track_info(&self) -> Option<TrackInfo> {
        self.shared.current_track.read().clone()
    }

    /// Gets the current playback position in milliseconds, or `None` if no
    /// track is loaded.
    #[must_use]
    pub fn current_position(&self) -> Option<u64> {
        self.shared
            .current_track
            .read()
            .as_ref()
            .map(|_| self.shared.position_ms.load(SeqCst))
    }

    /// Subscribes to engine events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Stops playback and terminates the control loop.
    pub fn shutdown(&self) {
        debug!("Shutting down audio engine");
        self.shared.intentional_stop.store(true, SeqCst);
        let _ = self.control_tx.try_send(ControlMessage::Shutdown);
        self.control_tx.close();
    }

    fn send(&self, message: ControlMessage) -> Result<(), AudioError> {
        self.control_tx
            .try_send(message)
            .map_err(|_| AudioError::EngineShutDown)
    }
}

impl PlaybackControl for AudioEngine {
    fn load_and_play(&self, track: &AudioMetadata) -> Result<(), AudioError> {
        self.load_track(&track.path)?;
        self.play()
    }

    fn stop(&self) -> Result<(), AudioError> {
        AudioEngine::stop(self)
    }

    fn position_ms(&self) -> u64 {
        self.current_position().unwrap_or(0)
    }
}

fn clamp_volume(linear: f32) -> f32 {
    if linear.is_nan() {
        0.0
    } else {
        linear.clamp(0.0, 1.0)
    }
}

/// Decode ring buffer size for a format, rounded up to a power of two.
fn ring_capacity(format: &AudioFormat, buffer_duration_ms: u32) -> usize {
    let samples = u64::from(format.sample_rate) * u64::from(format.channels.max(1))
        * u64::from(buffer_duration_ms)
        / 1000;
    usize::try_from(samples)
        .unwrap_or(MIN_RING_CAPACITY)
        .max(MIN_RING_CAPACITY)
        .next_power_of_two()
}

/// A running output pipeline.
///
/// `cpal::Stream` is not `Send`, so this never leaves the control thread.
struct ActivePipeline {
    stream: Stream,
    decoder_handle: Option<JoinHandle<Result<(), DecoderError>>>,
    resampler: Option<ResamplingAudioConsumer>,
    monitor: Arc<OutputMonitor>,
    decode_complete: Arc<AtomicBool>,
    device_rate: u32,
    base_position_ms: u64,
}

impl ActivePipeline {
    fn position_ms(&self) -> u64 {
        let rate = u64::from(self.device_rate.max(1));
        self.base_position_ms + self.monitor.frames() * 1000 / rate
    }

    fn is_drained(&self) -> bool {
        self.decode_complete.load(SeqCst)
            && self
                .resampler
                .as_ref()
                .is_none_or(ResamplingAudioConsumer::is_finished)
            && self.monitor.is_starved()
    }
}

/// Owner of the pipeline and of every state transition.
struct ControlLoop {
    shared: Arc<EngineShared>,
    events: broadcast::Sender<EngineEvent>,
    end_watch: EndWatch,
    output_config: OutputConfig,
    active: Option<ActivePipeline>,
}

impl ControlLoop {
    fn run(mut self, control_rx: Receiver<ControlMessage>) {
        let runtime = match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Failed to build engine runtime: {e}");
                return;
            }
        };

        runtime.block_on(async {
            let mut ticker = interval(POSITION_POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                let playing = *self.shared.state.read() == PlaybackState::Playing;
                select! {
                    message = control_rx.recv() => match message {
                        Ok(ControlMessage::Shutdown) | Err(_) => break,
                        Ok(message) => self.handle(message).await,
                    },
                    _ = ticker.tick(), if playing => self.poll_position().await,
                }
            }

            self.stop_stream().await;
            self.shared.spectrum.stop();
        });
        debug!("Engine control loop exited");
    }

    async fn handle(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Load => {
                self.stop_stream().await;
                self.shared.spectrum.stop();
                self.end_watch.reset();
                self.set_state(PlaybackState::Ready);
            }
            ControlMessage::Play => {
                if *self.shared.state.read() == PlaybackState::Paused && self.active.is_some() {
                    self.resume().await;
                } else {
                    self.start_playback(0, false).await;
                }
            }
            ControlMessage::Pause => self.pause().await,
            ControlMessage::Resume => self.resume().await,
            ControlMessage::Stop { generation } => {
                self.stop_stream().await;
                self.shared.spectrum.stop();
                self.end_watch.reset();
                let unloaded = {
                    let mut current = self.shared.current_track.write();
                    let unchanged = self.shared.load_generation.load(SeqCst) == generation;
                    if unchanged {
                        *current = None;
                    }
                    unchanged
                };
                if unloaded {
                    self.shared.position_ms.store(0, SeqCst);
                    self.set_state(PlaybackState::Stopped);
                } else {
                    debug!("Track loaded after stop request, keeping it");
                }
            }
            ControlMessage::Seek(position_ms) => self.seek(position_ms).await,
            ControlMessage::Shutdown => {}
        }
    }

    async fn start_playback(&mut self, position_ms: u64, paused: bool) {
        self.set_state(PlaybackState::Buffering);
        self.stop_stream().await;

        match self.start_stream(position_ms) {
            Ok(pipeline) => {
                self.active = Some(pipeline);
                self.end_watch.rearm();
                self.shared.position_ms.store(position_ms, SeqCst);
                self.shared.intentional_stop.store(false, SeqCst);
                if paused {
                    self.pause().await;
                } else {
                    self.start_spectrum();
                    self.set_state(PlaybackState::Playing);
                }
            }
            Err(e) => {
                error!("Failed to start playback: {e}");
                self.set_state(PlaybackState::Stopped);
            }
        }
    }

    /// Builds decoder, optional resampler and output stream for the loaded
    /// track, starting at `position_ms`.
    fn start_stream(&self, position_ms: u64) -> Result<ActivePipeline, AudioError> {
        let track_info = self
            .shared
            .current_track
            .read()
            .clone()
            .ok_or(AudioError::NoTrackLoaded)?;

        let mut decoder = AudioDecoder::new(&track_info.path)?;
        if position_ms > 0 {
            decoder.seek(position_ms)?;
        }
        let format = decoder.format.clone();
        let output = AudioOutput::new(Some(self.output_config.clone()))?;
        let plan = output.plan_stream(&format)?;
        let device_rate = plan.config.sample_rate.0;
        let source_channels = usize::try_from(format.channels).unwrap_or(2);

        let capacity = ring_capacity(&format, self.output_config.buffer_duration_ms);
        let (producer, consumer) = RingBuffer::<f32>::new(capacity);
        let decode_complete = Arc::new(AtomicBool::new(false));

        let (consumer, resampler) = if plan.needs_resampling {
            let (resampled_producer, resampled_consumer) = RingBuffer::<f32>::new(capacity);
            let resampler = ResamplingAudioConsumer::new(
                consumer,
                resampled_producer,
                format.sample_rate,
                device_rate,
                source_channels,
                Arc::clone(&decode_complete),
            )
            .map_err(|e| AudioError::InvalidOperation {
                reason: e.to_string(),
            })?;
            (resampled_consumer, Some(resampler))
        } else {
            (consumer, None)
        };

        let monitor = Arc::new(OutputMonitor::default());
        let tap = self
            .shared
            .spectrum_enabled
            .load(SeqCst)
            .then(|| self.shared.spectrum.make_tap(device_rate));
        let context = CallbackContext {
            gain: Arc::clone(&self.shared.gain),
            monitor: Arc::clone(&monitor),
            tap,
            source_channels,
        };
        let stream = output.create_stream(&plan, consumer, context)?;

        let audio_producer = AudioProducer::new(decoder, producer, Arc::clone(&decode_complete));
        let decoder_handle = ThreadBuilder::new()
            .name("sonance-decoder".to_string())
            .spawn(move || audio_producer.run())
            .map_err(|e| AudioError::InvalidOperation {
                reason: format!("Failed to spawn decoder thread: {e}"),
            })?;

        stream.play().map_err(|e| AudioError::OutputError(e.into()))?;
        info!(
            path = %track_info.path,
            device = %output.get_current_device_name(),
            position_ms,
            device_rate,
            "Playback stream started"
        );

        Ok(ActivePipeline {
            stream,
            decoder_handle: Some(decoder_handle),
            resampler,
            monitor,
            decode_complete,
            device_rate,
            base_position_ms: position_ms,
        })
    }

    async fn pause(&mut self) {
        let failed = self.active.as_ref().and_then(|active| {
            active
                .stream
                .pause()
                .err()
                .map(|e| (e, active.position_ms()))
        });
        if let Some((e, position)) = failed {
            warn!("Stream cannot pause, tearing it down: {e}");
            self.stop_stream().await;
            self.shared.position_ms.store(position, SeqCst);
        }
        self.shared.spectrum.stop();
        self.set_state(PlaybackState::Paused);
    }

    async fn resume(&mut self) {
        let resumed = self.active.as_ref().map(|active| active.stream.play());
        match resumed {
            Some(Ok(())) => {
                self.start_spectrum();
                self.set_state(PlaybackState::Playing);
            }
            Some(Err(e)) => {
                warn!("Failed to resume stream, rebuilding: {e}");
                let position = self.shared.position_ms.load(SeqCst);
                self.start_playback(position, false).await;
            }
            None => {
                let position = self.shared.position_ms.load(SeqCst);
                self.start_playback(position, false).await;
            }
        }
    }

    async fn seek(&mut self, position_ms: u64) {
        let duration_ms = self
            .shared
            .current_track
            .read()
            .as_ref()
            .map_or(0, |track| track.duration_ms);
        let target = if duration_ms > 0 {
            position_ms.min(duration_ms)
        } else {
            position_ms
        };

        // Each seek restarts the suppression window.
        self.end_watch.suppress(Instant::now());

        let state = *self.shared.state.read();
        match state {
            PlaybackState::Playing | PlaybackState::Buffering => {
                self.start_playback(target, false).await;
            }
            PlaybackState::Paused => self.start_playback(target, true).await,
            PlaybackState::Ready | PlaybackState::Stopped => {
                self.shared.position_ms.store(target, SeqCst);
            }
        }

        let _ = self.events.send(EngineEvent::PositionChanged {
            position_ms: target,
            duration_ms,
        });
    }

    async fn poll_position(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };

        let position_ms = active.position_ms();
        let drained = active.is_drained();
        self.shared.position_ms.store(position_ms, SeqCst);

        let Some((path, duration_ms)) = self
            .shared
            .current_track
            .read()
            .as_ref()
            .map(|track| (track.path.clone(), track.duration_ms))
        else {
            return;
        };

        let _ = self.events.send(EngineEvent::PositionChanged {
            position_ms: if duration_ms > 0 {
                position_ms.min(duration_ms)
            } else {
                position_ms
            },
            duration_ms,
        });

        let check = self.end_watch.check(
            position_ms,
            duration_ms,
            drained,
            self.shared.intentional_stop.load(SeqCst),
            Instant::now(),
        );
        if check == EndCheck::Continue {
            return;
        }

        self.stop_stream().await;
        self.shared.spectrum.stop();
        self.set_state(PlaybackState::Stopped);

        if check == EndCheck::Interrupted {
            debug!("Track ended during a user transition, not advancing");
        } else {
            info!(path = %path, "Track finished");
            let _ = self.events.send(EngineEvent::TrackFinished { path });
        }
    }

    fn start_spectrum(&self) {
        if self.shared.spectrum_enabled.load(SeqCst) {
            self.shared.spectrum.start(&Handle::current());
        }
    }

    /// Stops the current pipeline and waits for the decoder thread.
    async fn stop_stream(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        debug!("Stopping audio stream");

        if let Some(mut resampler) = active.resampler.take() {
            resampler.stop();
        }
        drop(active.stream);

        if let Some(decoder_handle) = active.decoder_handle.take() {
            match timeout(
                DECODER_JOIN_TIMEOUT,
                spawn_blocking(move || decoder_handle.join()),
            )
            .await
            {
                Ok(Ok(Ok(Ok(())))) => debug!("Decoder thread stopped"),
                Ok(Ok(Ok(Err(e)))) => warn!("Decoder thread stopped with error: {e}"),
                Ok(Ok(Err(_))) => error!("Decoder thread panicked"),
                Ok(Err(e)) => error!("Failed to join decoder thread: {e}"),
                Err(_) => error!("Timeout waiting for decoder thread to stop"),
            }
        }
    }

    fn set_state(&self, state: PlaybackState) {
        let changed = {
            let mut current = self.shared.state.write();
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            debug!(?state, "Playback state changed");
            let _ = self.events.send(EngineEvent::StateChanged(state));
        }
    }
}
