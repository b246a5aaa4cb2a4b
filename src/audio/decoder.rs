//! Audio file decoding using the `symphonia` crate.
//!
//! This module handles format probing and decoding, and feeds decoded
//! interleaved samples to the output through a ring buffer.

use std::{
    fs::File,
    io::{Error as StdError, ErrorKind::UnexpectedEof},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering::SeqCst},
    },
    thread::sleep,
    time::Duration,
};

use {
    rtrb::{Producer, PushError::Full},
    serde::{Deserialize, Serialize},
    symphonia::{
        core::{
            audio::{SampleBuffer, SignalSpec},
            codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions},
            errors::Error as SymphoniaError,
            formats::{FormatOptions, FormatReader, SeekMode::Accurate, SeekTo::Time},
            io::{MediaSourceStream, MediaSourceStreamOptions},
            meta::MetadataOptions,
            probe::Hint,
            units::Time as SymphoniaTime,
        },
        default::{get_codecs, get_probe},
    },
    thiserror::Error,
    tracing::{debug, warn},
};

/// Sleep duration when producer buffer is full.
const PRODUCER_SLEEP_DURATION: Duration = Duration::from_micros(100);

/// Error type for audio decoding operations.
#[derive(Error, Debug)]
pub enum DecoderError {
    /// Failed to open or read the audio file.
    #[error("IO error: {0}")]
    IoError(#[from] StdError),
    /// Symphonia decoding error.
    #[error("Decoding error: {0}")]
    SymphoniaError(#[from] SymphoniaError),
    /// Unsupported audio format.
    #[error("Unsupported audio format")]
    UnsupportedFormat,
    /// No audio track found in file.
    #[error("No audio track found")]
    NoAudioTrack,
}

/// Audio format information extracted during decoding setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u32,
    /// Bits per sample.
    pub bits_per_sample: u32,
}

/// Audio decoder that reads and decodes audio files.
pub struct AudioDecoder {
    /// The underlying format reader.
    format_reader: Box<dyn FormatReader>,
    /// The active audio decoder.
    decoder: Box<dyn Decoder>,
    /// Track id of the selected audio track.
    track_id: u32,
    /// Audio format information.
    pub format: AudioFormat,
    /// Signal specification from symphonia (sample rate + channel layout).
    pub signal_spec: SignalSpec,
}

impl AudioDecoder {
    /// Creates a new audio decoder for the specified file.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if:
    /// - The file cannot be opened or read
    /// - The file format is unsupported
    /// - No audio track is found in the file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DecoderError> {
        let path = path.as_ref();

        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| match e {
                SymphoniaError::Unsupported(_) => DecoderError::UnsupportedFormat,
                other => DecoderError::SymphoniaError(other),
            })?;

        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecoderError::NoAudioTrack)?;
        let track_id = track.id;
        let codec_params = &track.codec_params;

        let signal_spec = SignalSpec::new(
            codec_params.sample_rate.unwrap_or(44100),
            codec_params.channels.ok_or(DecoderError::NoAudioTrack)?,
        );

        let format = AudioFormat {
            sample_rate: signal_spec.rate,
            channels: u32::try_from(signal_spec.channels.count()).unwrap_or(2),
            bits_per_sample: codec_params.bits_per_sample.unwrap_or(16),
        };

        let decoder = get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(_) => DecoderError::UnsupportedFormat,
                other => DecoderError::SymphoniaError(other),
            })?;

        Ok(AudioDecoder {
            format_reader,
            decoder,
            track_id,
            format,
            signal_spec,
        })
    }

    /// Decodes the next packet into interleaved f32 samples.
    ///
    /// Returns `None` at the end of the stream. Corrupted packets are skipped.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if reading or decoding fails.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let mut buffer =
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                    buffer.copy_interleaved_ref(decoded);
                    return Ok(Some(buffer.samples().to_vec()));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!("Skipping corrupted packet: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Seeks to the specified time position in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if seeking fails.
    pub fn seek(&mut self, position_ms: u64) -> Result<(), DecoderError> {
        let seconds = position_ms / 1000;
        let frac = f64::from(u32::try_from(position_ms % 1000).unwrap_or(0)) / 1000.0;
        self.format_reader.seek(
            Accurate,
            Time {
                time: SymphoniaTime::new(seconds, frac),
                track_id: Some(self.track_id),
            },
        )?;
        self.decoder.reset();
        Ok(())
    }

    /// Gets the duration of the audio file in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.format_reader
            .tracks()
            .iter()
            .find(|track| track.id == self.track_id)
            .and_then(|track| track.codec_params.n_frames)
            .map(|frames| frames_to_ms(frames, self.format.sample_rate))
    }
}

/// Converts a frame count to milliseconds, rounding to nearest.
#[must_use]
pub fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    let sample_rate = u64::from(sample_rate.max(1));
    (frames * 1000 + sample_rate / 2) / sample_rate
}

/// Audio producer that feeds decoded samples into a ring buffer.
pub struct AudioProducer {
    /// The audio decoder that provides raw audio samples.
    decoder: AudioDecoder,
    /// Ring buffer producer for writing decoded samples.
    producer: Producer<f32>,
    /// Set once the decoder reached the natural end of the stream.
    decode_complete: Arc<AtomicBool>,
}

impl AudioProducer {
    /// Creates a new audio producer.
    pub fn new(
        decoder: AudioDecoder,
        producer: Producer<f32>,
        decode_complete: Arc<AtomicBool>,
    ) -> Self {
        decode_complete.store(false, SeqCst);
        Self {
            decoder,
            producer,
            decode_complete,
        }
    }

    /// Runs the audio production loop on the calling thread.
    ///
    /// Returns when the stream ends or the consumer side is dropped.
    ///
    /// # Errors
    ///
    /// Returns `DecoderError` if decoding fails.
    pub fn run(mut self) -> Result<(), DecoderError> {
        loop {
            let samples = match self.decoder.decode_next() {
                Ok(Some(samples)) => samples,
                Ok(None) => break,
                Err(e) => {
                    warn!("Decoder stopped early: {e}");
                    self.decode_complete.store(true, SeqCst);
                    return Err(e);
                }
            };

            for sample in samples {
                let mut pending = sample;
                loop {
                    if self.producer.is_abandoned() {
                        return Ok(());
                    }
                    match self.producer.push(pending) {
                        Ok(()) => break,
                        Err(Full(value)) => {
                            pending = value;
                            sleep(PRODUCER_SLEEP_DURATION);
                        }
                    }
                }
            }
        }

        debug!("Decoder reached end of stream");
        self.decode_complete.store(true, SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Error, ErrorKind::NotFound},
        sync::{Arc, atomic::{AtomicBool, Ordering::SeqCst}},
        thread::spawn,
    };

    use {rtrb::RingBuffer, tempfile::tempdir};

    use crate::{
        audio::decoder::{AudioDecoder, AudioProducer, DecoderError, frames_to_ms},
        test_support::write_wav,
    };

    #[test]
    fn test_decoder_error_display() {
        let io_error = Error::new(NotFound, "File not found");
        let decoder_error = DecoderError::IoError(io_error);
        assert!(decoder_error.to_string().contains("IO error"));

        let unsupported_error = DecoderError::UnsupportedFormat;
        assert_eq!(unsupported_error.to_string(), "Unsupported audio format");
    }

    #[test]
    fn test_frames_to_ms() {
        assert_eq!(frames_to_ms(44_100, 44_100), 1000);
        assert_eq!(frames_to_ms(22_050, 44_100), 500);
        assert_eq!(frames_to_ms(1, 0), 1000);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = AudioDecoder::new("/definitely/not/here.flac");
        assert!(matches!(result, Err(DecoderError::IoError(_))));
    }

    #[test]
    fn test_decode_wav_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8_000, 2, 8_000).unwrap();

        let mut decoder = AudioDecoder::new(&path).unwrap();
        assert_eq!(decoder.format.sample_rate, 8_000);
        assert_eq!(decoder.format.channels, 2);
        assert_eq!(decoder.duration_ms(), Some(1000));

        let mut samples = 0;
        while let Some(block) = decoder.decode_next().unwrap() {
            assert!(block.iter().all(|s| (-1.0..=1.0).contains(s)));
            samples += block.len();
        }
        assert_eq!(samples, 16_000);

        decoder.seek(500).unwrap();
        assert!(decoder.decode_next().unwrap().is_some());
    }

    #[test]
    fn test_producer_marks_completion() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8_000, 1, 800).unwrap();

        let decoder = AudioDecoder::new(&path).unwrap();
        let (producer, mut consumer) = RingBuffer::<f32>::new(256);
        let complete = Arc::new(AtomicBool::new(false));
        let worker = {
            let complete = Arc::clone(&complete);
            spawn(move || AudioProducer::new(decoder, producer, complete).run())
        };

        let mut received = 0;
        while received < 800 {
            if consumer.pop().is_ok() {
                received += 1;
            }
        }

        worker.join().unwrap().unwrap();
        assert!(complete.load(SeqCst));
        assert!(consumer.pop().is_err());
    }
}
