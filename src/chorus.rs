//! Modulated-delay chorus send bus: each channel reads back from a
//! delay line at a position that slowly sweeps with a low-frequency
//! sine, widening and thickening the signal.

use crate::Float;

const TWO_PI: Float = std::f64::consts::PI * 2.0;

/// One channel's modulated delay line: a ring buffer read back at a
/// fractional offset that oscillates around `delay_seconds`.
struct ModulatedDelay {
    buffer: Vec<Float>,
    write_index: usize,
    sample_rate: Float,
    delay_samples: Float,
    depth_samples: Float,
    phase: Float,
    phase_step: Float,
}

impl ModulatedDelay {
    fn new(sample_rate: u32, delay_seconds: Float, depth_seconds: Float, rate_hz: Float, phase_offset: Float) -> ModulatedDelay {
        let sample_rate = sample_rate as Float;
        let delay_samples = delay_seconds * sample_rate;
        let depth_samples = depth_seconds * sample_rate;
        let buffer_len = (delay_samples + depth_samples).ceil() as usize + 2;
        ModulatedDelay {
            buffer: vec![0.0; buffer_len.max(4)],
            write_index: 0,
            sample_rate,
            delay_samples,
            depth_samples,
            phase: phase_offset,
            phase_step: TWO_PI * rate_hz / sample_rate,
        }
    }

    fn process(&mut self, input: Float, feedback: Float) -> Float {
        let len = self.buffer.len() as Float;
        let modulated_delay = self.delay_samples + self.depth_samples * self.phase.sin();
        let read_pos = (self.write_index as Float - modulated_delay).rem_euclid(len);
        let i0 = read_pos.floor() as usize % self.buffer.len();
        let i1 = (i0 + 1) % self.buffer.len();
        let frac = read_pos - read_pos.floor();
        let delayed = self.buffer[i0] * (1.0 - frac) + self.buffer[i1] * frac;

        self.buffer[self.write_index] = input + delayed * feedback;
        self.write_index = (self.write_index + 1) % self.buffer.len();
        self.phase += self.phase_step;
        if self.phase > TWO_PI {
            self.phase -= TWO_PI;
        }
        delayed
    }

    fn mute(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
    }
}

/// The chorus send bus: stereo in, stereo out, each side carrying its
/// own modulated delay line a quarter-cycle out of phase with the
/// other for stereo width.
pub struct Chorus {
    left: ModulatedDelay,
    right: ModulatedDelay,
    feedback: Float,
}

impl Chorus {
    /// `delay`/`depth` are in seconds, `rate` in Hz, matching the
    /// conventional low-frequency-oscillator chorus parameterization.
    pub fn new(sample_rate: u32, delay: Float, depth: Float, rate: Float) -> Chorus {
        Chorus {
            left: ModulatedDelay::new(sample_rate, delay, depth, rate, 0.0),
            right: ModulatedDelay::new(sample_rate, delay, depth, rate, std::f64::consts::FRAC_PI_2),
            feedback: 0.0,
        }
    }

    pub fn set_feedback(&mut self, feedback: Float) {
        self.feedback = feedback.clamp(-0.95, 0.95);
    }

    /// Renders one block in place: `in_left`/`in_right` are the mixed
    /// chorus send per channel, `out_left`/`out_right` receive the wet
    /// signal (overwritten, not accumulated).
    pub fn process(&mut self, in_left: &[Float], in_right: &[Float], out_left: &mut [Float], out_right: &mut [Float]) {
        for i in 0..in_left.len() {
            out_left[i] = self.left.process(in_left[i], self.feedback);
            out_right[i] = self.right.process(in_right[i], self.feedback);
        }
    }

    pub fn mute(&mut self) {
        self.left.mute();
        self.right.mute();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_in_produces_silence_out() {
        let mut chorus = Chorus::new(44100, 0.002, 0.0019, 0.4);
        let input = vec![0.0; 256];
        let mut left = vec![0.0; 256];
        let mut right = vec![0.0; 256];
        chorus.process(&input, &input, &mut left, &mut right);
        assert!(left.iter().all(|&s| s == 0.0));
        assert!(right.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn a_steady_tone_reappears_after_the_delay() {
        let mut chorus = Chorus::new(44100, 0.002, 0.0, 0.0);
        let input = vec![1.0; 512];
        let mut left = vec![0.0; 512];
        let mut right = vec![0.0; 512];
        chorus.process(&input, &input, &mut left, &mut right);
        let settled_energy: Float = left[200..].iter().map(|s| s * s).sum();
        assert!(settled_energy > 0.0, "delayed signal should appear once the buffer fills");
    }

    #[test]
    fn left_and_right_channels_diverge_with_modulation() {
        let mut chorus = Chorus::new(44100, 0.002, 0.0019, 0.4);
        let input: Vec<Float> = (0..2048).map(|i| (i as Float * 0.05).sin()).collect();
        let mut left = vec![0.0; 2048];
        let mut right = vec![0.0; 2048];
        chorus.process(&input, &input, &mut left, &mut right);
        let difference: Float = left.iter().zip(right.iter()).map(|(l, r)| (l - r).abs()).sum();
        assert!(difference > 0.0, "out-of-phase modulation should make the two channels differ");
    }
}
