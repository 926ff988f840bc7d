//! SoundFont 2.04 unit conversions: timecents, centibels and absolute
//! cents to the physical units the rest of the engine works in.
//!
//! These are pure functions so the envelope, filter and voice code can
//! call them on every parameter recompute without touching any shared
//! state.

use crate::Float;

/// SF2 sentinel: `-32768` timecents means "no time at all" (0 seconds),
/// not `2^(-32768/1200)` which would underflow to zero anyway but is
/// spelled out by the spec as a special case.
const TIMECENT_SENTINEL: i16 = -32768;

/// Converts SF2 timecents to seconds: `2^(tc/1200)`.
pub fn timecents_to_seconds(tc: i16) -> Float {
    if tc == TIMECENT_SENTINEL {
        return 0.0;
    }
    2.0_f64.powf(tc as Float / 1200.0)
}

/// Inverse of [`timecents_to_seconds`], used only by round-trip tests.
pub fn seconds_to_timecents(seconds: Float) -> i16 {
    if seconds <= 0.0 {
        return TIMECENT_SENTINEL;
    }
    (1200.0 * seconds.log2()).round() as i16
}

/// Converts absolute cents (referenced to 8.176 Hz) to Hz.
pub fn absolute_cents_to_hz(ac: Float) -> Float {
    8.176 * 2.0_f64.powf(ac / 1200.0)
}

/// Converts Hz to absolute cents. Used to seed `cutoff` recompute
/// thresholds and by tests.
pub fn hz_to_absolute_cents(hz: Float) -> Float {
    1200.0 * (hz / 8.176).log2()
}

/// Converts centibels of attenuation to a linear gain factor:
/// `10^(-cb/200)`, clamped to 0 once the attenuation reaches 1000 cB
/// (100 dB), which is silence for any practical purpose.
pub fn centibels_to_gain(cb: Float) -> Float {
    if cb >= 1000.0 {
        return 0.0;
    }
    10.0_f64.powf(-cb / 200.0)
}

/// Converts a linear gain factor back to centibels. Used only by
/// round-trip tests; not on the hot path.
pub fn gain_to_centibels(gain: Float) -> Float {
    if gain <= 0.0 {
        return 1000.0;
    }
    -200.0 * gain.log10()
}

/// Converts decibels of attenuation to a linear gain factor:
/// `10^(-dB/20)`.
pub fn decibels_to_gain(db: Float) -> Float {
    10.0_f64.powf(-db / 20.0)
}

/// Converts a linear gain factor to decibels of attenuation.
pub fn gain_to_decibels(gain: Float) -> Float {
    if gain <= 0.0 {
        return 100.0;
    }
    -20.0 * gain.log10()
}

/// Equal-power left/right gains for an SF2 pan generator value in
/// `-500..=500` (0.1% units). `0` is centered.
pub fn pan_to_gains(pan: Float) -> (Float, Float) {
    let angle = (pan + 500.0) / 1000.0 * std::f64::consts::FRAC_PI_2;
    (angle.cos(), angle.sin())
}

/// Perceived silence threshold used to decide when a released voice
/// can be retired: 96 dB of attenuation below unity gain.
pub const PERCEIVED_SILENCE_DB: Float = 96.0;
