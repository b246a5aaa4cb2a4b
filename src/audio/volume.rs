//! Volume slider to output gain mapping.
//!
//! The slider value is linear in [0, 1]. Perceived loudness is not, so the
//! lower half of the slider is mapped onto a gentle slope and the upper half
//! onto a steeper one.

/// Slider position where the two segments meet.
const KNEE_INPUT: f32 = 0.5;

/// Output gain at the knee.
const KNEE_GAIN: f32 = 0.2;

/// Maps a linear slider value to an output gain.
///
/// The input is clamped to [0, 1]. Below the knee the gain rises at 0.4 per
/// unit, above it at 1.6 per unit, reaching 1.0 at full volume.
#[must_use]
pub fn apply_volume_curve(linear: f32) -> f32 {
    let v = if linear.is_nan() {
        0.0
    } else {
        linear.clamp(0.0, 1.0)
    };

    if v <= KNEE_INPUT {
        v * (KNEE_GAIN / KNEE_INPUT)
    } else {
        KNEE_GAIN + (v - KNEE_INPUT) * ((1.0 - KNEE_GAIN) / (1.0 - KNEE_INPUT))
    }
}
