//! Sample rate conversion for devices that cannot run at the source rate.
//!
//! A dedicated thread pulls decoded samples from the decoder ring buffer,
//! resamples them with `rubato` and pushes the result into the ring buffer
//! read by the output callback.

use std::{
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering::{Relaxed, SeqCst},
        },
    },
    thread::{JoinHandle, sleep, spawn},
    time::Duration,
};

use {
    rtrb::{Consumer, Producer, PushError::Full},
    rubato::{FftFixedIn, Resampler},
    thiserror::Error,
    tracing::{debug, error, info},
};

/// Idle sleep when there is nothing to read or no room to write.
const IDLE_SLEEP: Duration = Duration::from_micros(200);

/// Samples read from the source per loop iteration.
const READ_BLOCK: usize = 4096;

/// Error type for resampling operations.
#[derive(Error, Debug)]
pub enum ResamplingError {
    /// Rubato resampling error.
    #[error("Rubato error: {0}")]
    RubatoError(String),
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Real-time audio resampler using rubato.
pub struct AudioResampler {
    /// Rubato resampler instance.
    resampler: FftFixedIn<f32>,
    /// Number of channels.
    channels: usize,
    /// Fixed input chunk size per channel expected by rubato.
    chunk_size: usize,
    /// Accumulated interleaved input (may hold a partial chunk).
    pending: Vec<f32>,
    /// Per-channel scratch buffers for one chunk.
    planar: Vec<Vec<f32>>,
    /// Output frames per input frame.
    ratio: f64,
}

impl AudioResampler {
    /// Creates a new audio resampler.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if the rates are invalid or identical, or the
    /// resampler cannot be created.
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        channels: usize,
    ) -> Result<Self, ResamplingError> {
        if source_rate == 0 || target_rate == 0 {
            return Err(ResamplingError::InvalidConfiguration(
                "Sample rates must be greater than 0".to_string(),
            ));
        }
        if source_rate == target_rate {
            return Err(ResamplingError::InvalidConfiguration(
                "Source and target rates must be different".to_string(),
            ));
        }
        if channels == 0 {
            return Err(ResamplingError::InvalidConfiguration(
                "Channel count must be greater than 0".to_string(),
            ));
        }

        let chunk_size = calculate_chunk_size(source_rate, target_rate);
        let resampler = FftFixedIn::<f32>::new(
            source_rate as usize,
            target_rate as usize,
            chunk_size,
            1,
            channels,
        )
        .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;

        info!(
            "Created resampler: {source_rate} Hz -> {target_rate} Hz, {channels} channels, chunk size {chunk_size}"
        );

        Ok(AudioResampler {
            resampler,
            channels,
            chunk_size,
            pending: Vec::with_capacity(chunk_size * channels * 2),
            planar: vec![Vec::with_capacity(chunk_size); channels],
            ratio: f64::from(target_rate) / f64::from(source_rate),
        })
    }

    /// Resamples interleaved input, returning every complete output chunk.
    ///
    /// Input that does not fill a whole chunk is kept for the next call.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if rubato fails.
    pub fn resample_block(&mut self, input: &[f32]) -> Result<Vec<f32>, ResamplingError> {
        self.pending.extend_from_slice(input);

        let chunk_samples = self.chunk_size * self.channels;
        let mut output = Vec::new();

        while self.pending.len() >= chunk_samples {
            self.fill_planar(chunk_samples);
            let planar_out = self
                .resampler
                .process(&self.planar[..], None)
                .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;

            let frames = planar_out.first().map_or(0, Vec::len);
            interleave_into(&mut output, &planar_out, frames);
            self.pending.drain(..chunk_samples);
        }

        Ok(output)
    }

    /// Resamples the held-back partial chunk at the end of a stream.
    ///
    /// The zero padding rubato adds past the real input is trimmed, keeping
    /// the resampler delay so no real samples are cut.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if rubato fails.
    pub fn flush(&mut self) -> Result<Vec<f32>, ResamplingError> {
        let pending_samples = self.pending.len() - self.pending.len() % self.channels;
        if pending_samples == 0 {
            self.pending.clear();
            return Ok(Vec::new());
        }

        self.fill_planar(pending_samples);
        let planar_out = self
            .resampler
            .process_partial(Some(&self.planar[..]), None)
            .map_err(|e| ResamplingError::RubatoError(e.to_string()))?;
        self.pending.clear();

        let pending_frames = pending_samples / self.channels;
        let expected = (pending_frames as f64 * self.ratio).ceil() as usize
            + self.resampler.output_delay();
        let frames = planar_out.first().map_or(0, Vec::len).min(expected);

        let mut output = Vec::with_capacity(frames * self.channels);
        interleave_into(&mut output, &planar_out, frames);
        Ok(output)
    }

    /// Copies the first `samples` interleaved pending samples into the
    /// per-channel scratch buffers.
    fn fill_planar(&mut self, samples: usize) {
        for plane in &mut self.planar {
            plane.clear();
        }
        for frame in self.pending[..samples].chunks_exact(self.channels) {
            for (plane, &sample) in self.planar.iter_mut().zip(frame) {
                plane.push(sample);
            }
        }
    }
}

fn interleave_into(output: &mut Vec<f32>, planar: &[Vec<f32>], frames: usize) {
    output.reserve(frames * planar.len());
    for index in 0..frames {
        output.extend(planar.iter().map(|plane| plane[index]));
    }
}

/// Calculates a chunk size for the rate pair, between 256 and 8192 frames.
fn calculate_chunk_size(source_rate: u32, target_rate: u32) -> usize {
    let gcd = gcd(source_rate, target_rate);
    let base_chunk = (u64::from(target_rate) / u64::from(gcd)).min(4096) as usize;
    base_chunk.clamp(256, 8192)
}

/// Calculates the greatest common divisor of two numbers.
fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Background resampling stage between the decoder and the output.
pub struct ResamplingAudioConsumer {
    /// Running flag for the resampling thread.
    running: Arc<AtomicBool>,
    /// Set once the resampled tail of a finished stream has been pushed.
    finished: Arc<AtomicBool>,
    /// Resampling thread handle.
    thread_handle: Option<JoinHandle<()>>,
}

impl ResamplingAudioConsumer {
    /// Starts the resampling thread.
    ///
    /// Once `decode_complete` is set and the source is empty, the partial
    /// chunk still held by the resampler is flushed to the target.
    ///
    /// # Errors
    ///
    /// Returns `ResamplingError` if the resampler cannot be created.
    pub fn new(
        source_consumer: Consumer<f32>,
        target_producer: Producer<f32>,
        source_rate: u32,
        target_rate: u32,
        channels: usize,
        decode_complete: Arc<AtomicBool>,
    ) -> Result<Self, ResamplingError> {
        let resampler = AudioResampler::new(source_rate, target_rate, channels)?;
        let running = Arc::new(AtomicBool::new(true));
        let finished = Arc::new(AtomicBool::new(false));
        let stage = ResamplingStage {
            source: source_consumer,
            target: target_producer,
            resampler,
            running: Arc::clone(&running),
            decode_complete,
            finished: Arc::clone(&finished),
        };

        let thread_handle = Some(spawn(move || stage.run()));

        Ok(ResamplingAudioConsumer {
            running,
            finished,
            thread_handle,
        })
    }

    /// Whether every sample of a finished stream reached the target buffer.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(SeqCst)
    }

    /// Stops the resampling thread and waits for it.
    pub fn stop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            self.running.store(false, Relaxed);
            if handle.join().is_err() {
                error!("Resampling thread panicked");
            }
        }
    }
}

impl Drop for ResamplingAudioConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ResamplingStage {
    source: Consumer<f32>,
    target: Producer<f32>,
    resampler: AudioResampler,
    running: Arc<AtomicBool>,
    decode_complete: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl ResamplingStage {
    fn run(mut self) {
        let mut input = Vec::with_capacity(READ_BLOCK);

        while self.running.load(Relaxed) && !self.target.is_abandoned() {
            // Read before popping: once set, an empty source means the
            // decoder pushed everything.
            let source_done = self.decode_complete.load(SeqCst);

            input.clear();
            while input.len() < READ_BLOCK {
                match self.source.pop() {
                    Ok(sample) => input.push(sample),
                    Err(_) => break,
                }
            }

            if input.is_empty() {
                if source_done && !self.finished.load(SeqCst) {
                    match self.resampler.flush() {
                        Ok(tail) => {
                            if !self.push_all(tail) {
                                break;
                            }
                        }
                        Err(e) => error!("Resampling flush error: {e}"),
                    }
                    self.finished.store(true, SeqCst);
                    debug!("Resampled tail flushed");
                }
                sleep(IDLE_SLEEP);
                continue;
            }

            match self.resampler.resample_block(&input) {
                Ok(samples) => {
                    if !self.push_all(samples) {
                        break;
                    }
                }
                Err(e) => error!("Resampling error: {e}"),
            }
        }

        debug!("Resampling loop stopped");
    }

    /// Pushes every sample, waiting for room. False when the stage should
    /// exit.
    fn push_all(&mut self, samples: Vec<f32>) -> bool {
        for sample in samples {
            let mut pending = sample;
            loop {
                match self.target.push(pending) {
                    Ok(()) => break,
                    Err(Full(value)) => {
                        if !self.running.load(Relaxed) || self.target.is_abandoned() {
                            return false;
                        }
                        pending = value;
                        sleep(IDLE_SLEEP);
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering::SeqCst},
        },
        thread::sleep,
        time::{Duration, Instant},
    };

    use {rtrb::RingBuffer, rubato::Resampler};

    use crate::audio::resampler::{
        AudioResampler, ResamplingAudioConsumer, ResamplingError::InvalidConfiguration,
        calculate_chunk_size, gcd,
    };

    #[test]
    fn test_gcd_calculation() {
        assert_eq!(gcd(44100, 48000), 300);
        assert_eq!(gcd(96000, 48000), 48000);
        assert_eq!(gcd(192000, 48000), 48000);
    }

    #[test]
    fn test_chunk_size_calculation() {
        assert_eq!(calculate_chunk_size(44100, 48000), 256);
        let chunk_size = calculate_chunk_size(192000, 48000);
        assert!((256..=8192).contains(&chunk_size));
    }

    #[test]
    fn test_invalid_resampler_creation() {
        let result = AudioResampler::new(0, 48000, 2);
        assert!(matches!(result, Err(InvalidConfiguration(_))));

        let result = AudioResampler::new(44100, 44100, 2);
        assert!(matches!(result, Err(InvalidConfiguration(_))));

        let result = AudioResampler::new(44100, 48000, 0);
        assert!(matches!(result, Err(InvalidConfiguration(_))));
    }

    #[test]
    fn test_resample_ratio() -> Result<(), Box<dyn std::error::Error>> {
        let mut resampler = AudioResampler::new(44100, 48000, 2)?;
        let input = vec![0.0f32; 44100 * 2];
        let output = resampler.resample_block(&input)?;

        // Whole chunks only, so output is a little short of one second.
        assert_eq!(output.len() % 2, 0);
        let frames = output.len() / 2;
        assert!(frames > 40_000 && frames <= 48_000, "got {frames} frames");
        Ok(())
    }

    #[test]
    fn test_flush_emits_held_back_tail() -> Result<(), Box<dyn std::error::Error>> {
        let mut resampler = AudioResampler::new(44100, 48000, 2)?;
        let input = vec![0.5f32; 100 * 2];

        // Shorter than one chunk, so nothing comes out yet.
        assert!(resampler.resample_block(&input)?.is_empty());

        let tail = resampler.flush()?;
        assert!(!tail.is_empty());
        assert_eq!(tail.len() % 2, 0);
        let frames = tail.len() / 2;
        assert!(frames <= 109 + resampler.resampler.output_delay(), "got {frames} frames");

        assert!(resampler.flush()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_stage_flushes_tail_at_end_of_stream() {
        let (mut source_producer, source_consumer) = RingBuffer::<f32>::new(4096);
        let (target_producer, mut target_consumer) = RingBuffer::<f32>::new(1 << 16);
        // Less than one 256-frame chunk: only a flush produces output.
        for _ in 0..200 {
            source_producer.push(0.25).unwrap();
        }
        let decode_complete = Arc::new(AtomicBool::new(false));

        let mut stage = ResamplingAudioConsumer::new(
            source_consumer,
            target_producer,
            44100,
            48000,
            1,
            Arc::clone(&decode_complete),
        )
        .unwrap();

        sleep(Duration::from_millis(50));
        assert!(!stage.is_finished());
        decode_complete.store(true, SeqCst);

        let deadline = Instant::now() + Duration::from_secs(2);
        while !stage.is_finished() && Instant::now() < deadline {
            sleep(Duration::from_millis(5));
        }
        assert!(stage.is_finished());
        stage.stop();

        let mut received = 0;
        while target_consumer.pop().is_ok() {
            received += 1;
        }
        assert!(received > 0);
    }
}
