//! Vibrato and modulation LFOs (§4.3): a triangle wave starting at
//! `0.0`, held at `0.0` for a delay period, running at a fixed
//! frequency thereafter.

use crate::units::timecents_to_seconds;
use crate::Float;

#[derive(Clone, Copy, Debug, Default)]
pub struct LfoParams {
    pub delay: Float,
    pub frequency: Float,
}

impl LfoParams {
    pub fn new(delay_timecents: i16, frequency_abs_cents: Float) -> LfoParams {
        LfoParams {
            delay: timecents_to_seconds(delay_timecents),
            frequency: frequency_abs_cents,
        }
    }
}

pub struct Lfo {
    sample_rate: Float,
    params: LfoParams,
    samples_elapsed: i64,
    value: Float,
}

impl Lfo {
    pub fn new(sample_rate: Float) -> Lfo {
        Lfo {
            sample_rate,
            params: LfoParams::default(),
            samples_elapsed: 0,
            value: 0.0,
        }
    }

    pub fn trigger(&mut self, params: LfoParams) {
        self.params = params;
        self.samples_elapsed = 0;
        self.value = 0.0;
    }

    /// Advances the LFO by one sample and returns its current value
    /// in `-1.0..=1.0`.
    pub fn next_sample(&mut self) -> Float {
        let delay_samples = (self.params.delay * self.sample_rate).round() as i64;
        if self.samples_elapsed < delay_samples {
            self.samples_elapsed += 1;
            return 0.0;
        }

        let t = (self.samples_elapsed - delay_samples) as Float;
        let period_samples = if self.params.frequency > 0.0 {
            self.sample_rate / self.params.frequency
        } else {
            Float::INFINITY
        };
        let phase = if period_samples.is_finite() {
            (t / period_samples).fract()
        } else {
            0.0
        };
        // Triangle wave starting at 0.0, rising first: 0 -> 1 -> -1 -> 0.
        self.value = if phase < 0.25 {
            phase * 4.0
        } else if phase < 0.75 {
            1.0 - (phase - 0.25) * 4.0
        } else {
            -1.0 + (phase - 0.75) * 4.0
        };

        self.samples_elapsed += 1;
        self.value
    }

    /// Advances `n` samples at once, returning the value after the
    /// last one; see [`crate::mod_envelope::ModulationEnvelope::advance_block`].
    pub fn advance_block(&mut self, n: usize) -> Float {
        let mut value = self.value;
        for _ in 0..n {
            value = self.next_sample();
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let mut lfo = Lfo::new(1000.0);
        lfo.trigger(LfoParams {
            delay: 0.0,
            frequency: 5.0,
        });
        assert_eq!(lfo.next_sample(), 0.0);
    }

    #[test]
    fn stays_zero_during_delay() {
        let mut lfo = Lfo::new(1000.0);
        lfo.trigger(LfoParams {
            delay: 0.1,
            frequency: 5.0,
        });
        for _ in 0..100 {
            assert_eq!(lfo.next_sample(), 0.0);
        }
    }

    #[test]
    fn triangle_stays_in_range() {
        let mut lfo = Lfo::new(1000.0);
        lfo.trigger(LfoParams {
            delay: 0.0,
            frequency: 5.0,
        });
        for _ in 0..2000 {
            let v = lfo.next_sample();
            assert!((-1.0..=1.0).contains(&v));
        }
    }
}
