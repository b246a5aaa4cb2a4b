//! Helpers shared by unit tests.

use std::{f32::consts::TAU, fs::write, io::Result, path::Path};

/// Writes a 16-bit PCM WAV file holding a 440 Hz tone.
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: u32) -> Result<()> {
    let bytes_per_frame = u32::from(channels) * 2;
    let data_len = frames * bytes_per_frame;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * bytes_per_frame).to_le_bytes());
    bytes.extend_from_slice(&(bytes_per_frame as u16).to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());

    for frame in 0..frames {
        let phase = TAU * 440.0 * frame as f32 / sample_rate as f32;
        let sample = (phase.sin() * 0.5 * f32::from(i16::MAX)) as i16;
        for _ in 0..channels {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
    }

    write(path, bytes)
}
