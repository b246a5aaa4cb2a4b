//! Audio playback system.
//!
//! Decoding with symphonia, output through cpal, ring buffers from rtrb and
//! resampling with rubato, plus the play queue, volume curve, artwork cache
//! and spectrum analysis built around them.

pub mod artwork_cache;
pub mod decoder;
pub mod engine;
pub mod metadata;
pub mod output;
pub mod queue;
pub mod queue_manager;
#[cfg(test)]
mod queue_manager_tests;
pub mod resampler;
pub mod spectrum;
pub mod volume;
