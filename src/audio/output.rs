//! Audio output management using the `cpal` crate.
//!
//! This module handles device selection, stream configuration and the
//! real-time output callback. The callback never touches observable player
//! state: it reads the gain from an atomic, counts played frames into
//! another one and feeds the spectrum tap.

use std::{
    sync::{
        Arc,
        atomic::{
            AtomicBool, AtomicU32, AtomicU64,
            Ordering::{Relaxed, SeqCst},
        },
    },
    time::Duration,
};

use {
    cpal::{
        BufferSize, BuildStreamError, DefaultStreamConfigError, Device, FromSample, Host,
        OutputCallbackInfo, PlayStreamError, SampleFormat, SampleRate, SizedSample,
        Stream, StreamConfig, SupportedStreamConfigsError, default_host,
        traits::{DeviceTrait, HostTrait},
    },
    rtrb::Consumer,
    serde::{Deserialize, Serialize},
    thiserror::Error,
    tracing::{debug, error, info, warn},
};

use crate::audio::{decoder::AudioFormat, spectrum::SpectrumTap};

/// Error type for audio output operations.
#[derive(Error, Debug)]
pub enum OutputError {
    /// Stream could not be built.
    #[error("Audio output error: {0}")]
    CpalError(#[from] BuildStreamError),
    /// Failed to start audio stream.
    #[error("Failed to start audio stream: {0}")]
    StreamStartError(#[from] PlayStreamError),
    /// Device configuration could not be queried.
    #[error("Failed to query device configuration: {0}")]
    ConfigQueryError(String),
    /// No suitable audio device found.
    #[error("No suitable audio device found")]
    NoDeviceFound,
    /// Unsupported sample format.
    #[error("Unsupported sample format: {format:?}")]
    UnsupportedSampleFormat { format: SampleFormat },
}

impl From<SupportedStreamConfigsError> for OutputError {
    fn from(e: SupportedStreamConfigsError) -> Self {
        OutputError::ConfigQueryError(e.to_string())
    }
}

impl From<DefaultStreamConfigError> for OutputError {
    fn from(e: DefaultStreamConfigError) -> Self {
        OutputError::ConfigQueryError(e.to_string())
    }
}

/// Audio output configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output device name; `None` selects the host default.
    pub device_name: Option<String>,
    /// Buffer duration in milliseconds, used for the decode ring buffer and
    /// the stream build timeout.
    pub buffer_duration_ms: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            buffer_duration_ms: 50,
        }
    }
}

/// Counters published by the output callback.
#[derive(Debug, Default)]
pub struct OutputMonitor {
    /// Frames written to the device since the stream started.
    pub frames_played: AtomicU64,
    /// Set when the last callback ran out of decoded samples.
    pub starved: AtomicBool,
}

impl OutputMonitor {
    /// Frames played so far.
    pub fn frames(&self) -> u64 {
        self.frames_played.load(SeqCst)
    }

    /// Whether the callback found the buffer empty.
    pub fn is_starved(&self) -> bool {
        self.starved.load(SeqCst)
    }
}

/// Everything the output callback owns besides the sample consumer.
pub struct CallbackContext {
    /// Output gain as `f32` bits.
    pub gain: Arc<AtomicU32>,
    /// Published counters.
    pub monitor: Arc<OutputMonitor>,
    /// Spectrum tap, when the visualizer is enabled.
    pub tap: Option<SpectrumTap>,
    /// Interleaved channel count of the incoming samples.
    pub source_channels: usize,
}

/// Stream configuration chosen for a source format.
#[derive(Debug, Clone)]
pub struct StreamPlan {
    /// Configuration used to build the stream.
    pub config: StreamConfig,
    /// Device sample format.
    pub sample_format: SampleFormat,
    /// Whether the source rate differs from the device rate.
    pub needs_resampling: bool,
}

/// Manages audio output devices and streams.
pub struct AudioOutput {
    /// The CPAL host instance.
    host: Host,
    /// The selected output device.
    device: Device,
    /// Current output configuration.
    config: OutputConfig,
}

impl AudioOutput {
    /// Opens the configured output device, falling back to the host default
    /// when the named device is not present.
    ///
    /// # Errors
    ///
    /// Returns `OutputError::NoDeviceFound` if no output device is available.
    pub fn new(config: Option<OutputConfig>) -> Result<Self, OutputError> {
        let config = config.unwrap_or_default();
        let host = default_host();

        let named = config.device_name.as_deref().and_then(|wanted| {
            let found = host.output_devices().ok()?.find(|device| {
                device.name().map(|name| name == wanted).unwrap_or(false)
            });
            if found.is_none() {
                warn!("Output device '{wanted}' not found, using default");
            }
            found
        });

        let device = match named {
            Some(device) => device,
            None => host
                .default_output_device()
                .ok_or(OutputError::NoDeviceFound)?,
        };

        let output = AudioOutput {
            host,
            device,
            config,
        };
        debug!("Using output device {}", output.get_current_device_name());
        Ok(output)
    }

    /// Picks the stream configuration for a source format.
    ///
    /// A device configuration with the source channel count that supports
    /// the source rate is preferred. Otherwise the device default is used and
    /// the stream is resampled.
    ///
    /// # Errors
    ///
    /// Returns `OutputError` if device capabilities cannot be queried.
    pub fn plan_stream(&self, source_format: &AudioFormat) -> Result<StreamPlan, OutputError> {
        let source_rate = source_format.sample_rate;
        let exact = self
            .device
            .supported_output_configs()?
            .filter(|range| {
                u32::from(range.channels()) == source_format.channels
                    && range.min_sample_rate().0 <= source_rate
                    && source_rate <= range.max_sample_rate().0
            })
            .max_by_key(|range| range.sample_format() == SampleFormat::F32)
            .map(|range| range.with_sample_rate(SampleRate(source_rate)));

        let supported = match exact {
            Some(supported) => supported,
            None => self.device.default_output_config()?,
        };

        let needs_resampling = supported.sample_rate().0 != source_rate;
        if needs_resampling {
            info!(
                "Device runs at {} Hz, source is {} Hz; resampling",
                supported.sample_rate().0,
                source_rate
            );
        }

        Ok(StreamPlan {
            config: StreamConfig {
                channels: supported.channels(),
                sample_rate: supported.sample_rate(),
                buffer_size: BufferSize::Default,
            },
            sample_format: supported.sample_format(),
            needs_resampling,
        })
    }

    /// Creates a paused output stream reading interleaved f32 samples.
    ///
    /// # Errors
    ///
    /// Returns `OutputError` if the device format is unsupported or stream
    /// creation fails.
    pub fn create_stream(
        &self,
        plan: &StreamPlan,
        consumer: Consumer<f32>,
        context: CallbackContext,
    ) -> Result<Stream, OutputError> {
        match plan.sample_format {
            SampleFormat::F32 => self.build::<f32>(&plan.config, consumer, context),
            SampleFormat::I16 => self.build::<i16>(&plan.config, consumer, context),
            SampleFormat::U16 => self.build::<u16>(&plan.config, consumer, context),
            SampleFormat::I32 => self.build::<i32>(&plan.config, consumer, context),
            format => Err(OutputError::UnsupportedSampleFormat { format }),
        }
    }

    fn build<T>(
        &self,
        config: &StreamConfig,
        mut consumer: Consumer<f32>,
        mut context: CallbackContext,
    ) -> Result<Stream, OutputError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let device_channels = usize::from(config.channels);
        let mut frame = vec![0.0f32; context.source_channels.max(1)];
        let timeout = Duration::from_millis(u64::from(self.config.buffer_duration_ms));

        let stream = self.device.build_output_stream(
            config,
            move |data: &mut [T], _: &OutputCallbackInfo| {
                write_frames(data, device_channels, &mut frame, &mut consumer, &mut context);
            },
            |err| error!("Audio stream error: {err}"),
            Some(timeout),
        )?;

        Ok(stream)
    }

    /// Names of available output devices.
    pub fn get_available_devices(&self) -> Vec<String> {
        match self.host.output_devices() {
            Ok(devices) => devices.filter_map(|device| device.name().ok()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Name of the current output device, or "Unknown" if unavailable.
    pub fn get_current_device_name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string())
    }
}

/// Fills one device buffer from the sample consumer.
///
/// Whole source frames are popped at a time so channels never drift. Mono
/// sources are copied to every device channel; extra device channels get
/// silence. Missing input is written as silence and flags starvation.
fn write_frames<T>(
    data: &mut [T],
    device_channels: usize,
    frame: &mut [f32],
    consumer: &mut Consumer<f32>,
    context: &mut CallbackContext,
) where
    T: SizedSample + FromSample<f32>,
{
    let gain = f32::from_bits(context.gain.load(Relaxed));
    let source_channels = frame.len();
    let mut played: u64 = 0;
    let mut starved = false;

    for out_frame in data.chunks_mut(device_channels.max(1)) {
        if consumer.slots() < source_channels {
            starved = true;
            out_frame.iter_mut().for_each(|s| *s = T::EQUILIBRIUM);
            continue;
        }

        let mut sum = 0.0;
        for slot in frame.iter_mut() {
            *slot = consumer.pop().unwrap_or(0.0);
            sum += *slot;
        }
        if let Some(tap) = context.tap.as_mut() {
            tap.push(sum / source_channels as f32);
        }

        for (channel, out) in out_frame.iter_mut().enumerate() {
            let value = match (source_channels, frame.get(channel)) {
                (1, _) => frame[0],
                (_, Some(&value)) => value,
                (_, None) => 0.0,
            };
            *out = T::from_sample((value * gain).clamp(-1.0, 1.0));
        }
        played += 1;
    }

    context.monitor.frames_played.fetch_add(played, Relaxed);
    context.monitor.starved.store(starved, Relaxed);
}
