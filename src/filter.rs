//! The per-voice 2-pole resonant low-pass biquad (§4.3). Coefficients
//! are recomputed only when the cutoff moves by at least one cent or
//! the resonance changes, since the trig calls are too expensive to
//! redo every sample.

use log::trace;

use crate::units::absolute_cents_to_hz;
use crate::Float;

#[derive(Debug)]
pub struct Filter {
    sample_rate: Float,
    last_cutoff_hz: Float,
    last_resonance_cb: Float,
    a1: Float,
    a2: Float,
    b0: Float,
    b1: Float,
    b2: Float,
    x1: Float,
    x2: Float,
    y1: Float,
    y2: Float,
}

impl Filter {
    pub fn new(sample_rate: Float) -> Filter {
        Filter {
            sample_rate,
            last_cutoff_hz: 0.0,
            last_resonance_cb: Float::NAN,
            a1: 0.0,
            a2: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    /// Recomputes coefficients if `cutoff_abs_cents` moved by at least
    /// one cent or `resonance_cb` changed, then filters one sample.
    pub fn process(&mut self, sample: Float, cutoff_abs_cents: Float, resonance_cb: Float) -> Float {
        let cutoff_hz = absolute_cents_to_hz(cutoff_abs_cents).clamp(20.0, self.sample_rate * 0.49);
        if (cutoff_hz - self.last_cutoff_hz).abs() >= hz_per_cent(cutoff_hz)
            || resonance_cb != self.last_resonance_cb
        {
            self.update_coefficients(cutoff_hz, resonance_cb);
            self.last_cutoff_hz = cutoff_hz;
            self.last_resonance_cb = resonance_cb;
        }

        let y = self.b0 * sample + self.b1 * self.x1 + self.b2 * self.x2 - self.a1 * self.y1 - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = sample;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    /// RBJ cookbook low-pass biquad. `resonance_cb` is the SF2
    /// `initialFilterQ` generator, 0..960 centibels above the
    /// no-resonance floor; converted to a Q factor the way TinySoundFont
    /// and FluidSynth-style implementations do (Q in dB, shelved by 3.01
    /// dB to keep Q=0 flat).
    fn update_coefficients(&mut self, cutoff_hz: Float, resonance_cb: Float) {
        let q_db = (resonance_cb / 10.0).max(0.0);
        let q = 10.0_f64.powf(q_db / 20.0).max(0.707);

        let omega = 2.0 * std::f64::consts::PI * cutoff_hz / self.sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = (1.0 - cos_omega) / 2.0;
        let b1 = 1.0 - cos_omega;
        let b2 = (1.0 - cos_omega) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
        trace!(
            "filter coefficients updated: cutoff={:.1}Hz q={:.2} b0={:.4} b1={:.4} b2={:.4} a1={:.4} a2={:.4}",
            cutoff_hz, q, self.b0, self.b1, self.b2, self.a1, self.a2
        );
    }
}

/// Approximate Hz-per-cent slope at `hz`, used as the "moved by at
/// least one cent" threshold without a second absolute-cents
/// conversion every sample.
fn hz_per_cent(hz: Float) -> Float {
    hz * (2.0_f64.powf(1.0 / 1200.0) - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_passes_through_near_unity_below_cutoff() {
        let mut f = Filter::new(44100.0);
        let cutoff_cents = crate::units::hz_to_absolute_cents(4000.0);
        let mut last = 0.0;
        for _ in 0..2000 {
            last = f.process(1.0, cutoff_cents, 0.0);
        }
        assert!(last > 0.9, "expected near-unity DC gain, got {}", last);
    }

    #[test]
    fn attenuates_above_cutoff() {
        let mut f = Filter::new(44100.0);
        let cutoff_cents = crate::units::hz_to_absolute_cents(200.0);
        let mut max_amp: Float = 0.0;
        for i in 0..4000 {
            let input = (2.0 * std::f64::consts::PI * 8000.0 * i as Float / 44100.0).sin();
            let output = f.process(input, cutoff_cents, 0.0);
            max_amp = max_amp.max(output.abs());
        }
        assert!(max_amp < 0.5, "expected high frequency attenuation, got {}", max_amp);
    }
}
