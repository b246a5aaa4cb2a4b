//! Spectrum visualizer fed from a tap on the output pipeline.
//!
//! The output callback pushes mono-mixed samples into a lock-free ring
//! buffer. A sampling task drains it at a fixed cadence, runs an FFT over the
//! most recent window and publishes per-band levels in [0, 1].

use std::{collections::VecDeque, sync::Arc, time::Duration};

use {
    parking_lot::{Mutex, RwLock},
    rtrb::{Consumer, Producer, RingBuffer},
    spectrum_analyzer::{
        FrequencyLimit, samples_fft_to_spectrum, scaling::divide_by_N_sqrt, windows::hann_window,
    },
    tokio::{runtime::Handle, task::JoinHandle, time::interval},
    tracing::debug,
};

/// Number of samples per FFT window.
pub const FFT_SIZE: usize = 2048;

/// Number of published bands.
pub const BAND_COUNT: usize = 32;

/// Interval between two spectrum updates (about 30 frames per second).
pub const SAMPLING_INTERVAL: Duration = Duration::from_millis(33);

/// Lowest analysed frequency in Hz.
const MIN_FREQ: f32 = 20.0;

/// Highest analysed frequency in Hz, lowered to Nyquist for low sample rates.
const MAX_FREQ: f32 = 20_000.0;

/// Compression factor `k` in `ln(1 + k·m) / ln(1 + k)`.
const LOG_COMPRESSION: f32 = 10.0;

/// Capacity of the tap ring buffer.
const TAP_CAPACITY: usize = FFT_SIZE * 4;

/// Write side of the spectrum tap, owned by the output callback.
pub struct SpectrumTap {
    producer: Producer<f32>,
}

impl SpectrumTap {
    /// Pushes one mono sample. Samples are dropped while the buffer is full.
    #[inline]
    pub fn push(&mut self, sample: f32) {
        let _ = self.producer.push(sample);
    }
}

/// Read side of the tap plus the sample rate it was created for.
struct TapReader {
    consumer: Option<Consumer<f32>>,
    sample_rate: u32,
}

/// Computes band levels from the most recent `FFT_SIZE` samples.
///
/// Returns `BAND_COUNT` zeros when fewer samples are available or the FFT
/// fails. Bands are log-spaced between 20 Hz and 20 kHz (or Nyquist); each
/// takes the maximum bin magnitude inside it, tilted upward for higher bands
/// and log-compressed.
#[must_use]
pub fn compute_bands(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let mut bands = vec![0.0; BAND_COUNT];
    if samples.len() < FFT_SIZE || sample_rate == 0 {
        return bands;
    }

    let max_freq = MAX_FREQ.min(sample_rate as f32 / 2.0 - 1.0);
    if max_freq <= MIN_FREQ {
        return bands;
    }

    let window = &samples[samples.len() - FFT_SIZE..];
    let windowed = hann_window(window);
    let Ok(spectrum) = samples_fft_to_spectrum(
        &windowed,
        sample_rate,
        FrequencyLimit::Range(MIN_FREQ, max_freq),
        Some(&divide_by_N_sqrt),
    ) else {
        return bands;
    };

    // Full-scale sine through a Hann window lands near sqrt(N) / 4.
    let normalization = 4.0 / (FFT_SIZE as f32).sqrt();
    let ratio = max_freq / MIN_FREQ;

    for (freq, mag) in spectrum.data() {
        let position = (freq.val() / MIN_FREQ).ln() / ratio.ln();
        let index = ((position * BAND_COUNT as f32) as usize).min(BAND_COUNT - 1);
        bands[index] = bands[index].max(mag.val() * normalization);
    }

    for (index, band) in bands.iter_mut().enumerate() {
        let weight = 1.0 + index as f32 / BAND_COUNT as f32 * 2.0;
        let weighted = *band * weight;
        *band = ((1.0 + LOG_COMPRESSION * weighted).ln() / (1.0 + LOG_COMPRESSION).ln())
            .clamp(0.0, 1.0);
    }

    bands
}

/// Samples the tap at a fixed cadence and publishes band levels.
pub struct SpectrumAnalyzer {
    reader: Arc<Mutex<TapReader>>,
    bands: Arc<RwLock<Vec<f32>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    /// Creates an idle analyzer with all bands at zero.
    pub fn new() -> Self {
        Self {
            reader: Arc::new(Mutex::new(TapReader {
                consumer: None,
                sample_rate: 0,
            })),
            bands: Arc::new(RwLock::new(vec![0.0; BAND_COUNT])),
            task: Mutex::new(None),
        }
    }

    /// Creates a fresh tap for a stream running at `sample_rate`.
    ///
    /// The previous tap, if any, is disconnected.
    pub fn make_tap(&self, sample_rate: u32) -> SpectrumTap {
        let (producer, consumer) = RingBuffer::new(TAP_CAPACITY);
        let mut reader = self.reader.lock();
        reader.consumer = Some(consumer);
        reader.sample_rate = sample_rate;
        SpectrumTap { producer }
    }

    /// Starts the sampling task on the given runtime. Does nothing if it is
    /// already running.
    pub fn start(&self, handle: &Handle) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let reader = Arc::clone(&self.reader);
        let bands = Arc::clone(&self.bands);
        *task = Some(handle.spawn(async move {
            let mut ticker = interval(SAMPLING_INTERVAL);
            let mut window: VecDeque<f32> = VecDeque::with_capacity(FFT_SIZE);
            loop {
                ticker.tick().await;

                let sample_rate = {
                    let mut reader = reader.lock();
                    let sample_rate = reader.sample_rate;
                    if let Some(consumer) = reader.consumer.as_mut() {
                        while let Ok(sample) = consumer.pop() {
                            if window.len() == FFT_SIZE {
                                window.pop_front();
                            }
                            window.push_back(sample);
                        }
                    }
                    sample_rate
                };

                if window.len() == FFT_SIZE {
                    let samples: Vec<f32> = window.iter().copied().collect();
                    *bands.write() = compute_bands(&samples, sample_rate);
                }
            }
        }));
        debug!("Spectrum sampling started");
    }

    /// Stops the sampling task and resets every band to zero.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!("Spectrum sampling stopped");
        }
        self.reset();
    }

    /// Resets every band to zero.
    pub fn reset(&self) {
        self.bands.write().iter_mut().for_each(|band| *band = 0.0);
    }

    /// Latest published band levels.
    pub fn bands(&self) -> Vec<f32> {
        self.bands.read().clone()
    }

    /// Whether the sampling task is running.
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }
}
