//! The modulation envelope (§4.3): same DAHDSR shape as the volume
//! envelope, but it outputs a plain `0.0..=1.0` value — no dB
//! conversion — used to offset pitch and filter cutoff.

use log::trace;

use crate::soundfont::{GeneratorAmounts, GeneratorType};
use crate::units::timecents_to_seconds;
use crate::Float;

#[derive(Clone, Copy, Debug)]
pub struct ModEnvParams {
    pub delay: Float,
    pub attack: Float,
    pub hold: Float,
    pub decay: Float,
    pub sustain: Float,
    pub release: Float,
}

impl ModEnvParams {
    pub fn from_generators(generators: &GeneratorAmounts, key: u8) -> ModEnvParams {
        let hold_tc = generators.get(GeneratorType::HoldModEnv) as i32
            + generators.get(GeneratorType::KeynumToModEnvHold) as i32 * (60 - key as i32);
        let decay_tc = generators.get(GeneratorType::DecayModEnv) as i32
            + generators.get(GeneratorType::KeynumToModEnvDecay) as i32 * (60 - key as i32);

        // SF2 expresses modulation-envelope sustain as "percent of
        // peak not reached", in the 0..1000 per-mil range; clamp the
        // same way the volume envelope clamps its centibel sustain.
        let sustain_permil = generators.get(GeneratorType::SustainModEnv).clamp(0, 1000) as Float;

        ModEnvParams {
            delay: timecents_to_seconds(generators.get(GeneratorType::DelayModEnv)),
            attack: timecents_to_seconds(generators.get(GeneratorType::AttackModEnv)),
            hold: timecents_to_seconds(hold_tc.clamp(i16::MIN as i32, i16::MAX as i32) as i16),
            decay: timecents_to_seconds(decay_tc.clamp(i16::MIN as i32, i16::MAX as i32) as i16),
            sustain: 1.0 - sustain_permil / 1000.0,
            release: timecents_to_seconds(generators.get(GeneratorType::ReleaseModEnv)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    Finished,
}

#[derive(Debug)]
pub struct ModulationEnvelope {
    sample_rate: Float,
    state: State,
    samples_in_state: i64,
    params: ModEnvParams,
    release_start_value: Float,
    value: Float,
}

impl ModulationEnvelope {
    pub fn new(sample_rate: Float) -> ModulationEnvelope {
        ModulationEnvelope {
            sample_rate,
            state: State::Finished,
            samples_in_state: 0,
            params: ModEnvParams {
                delay: 0.0,
                attack: 0.0,
                hold: 0.0,
                decay: 0.0,
                sustain: 0.0,
                release: 0.0,
            },
            release_start_value: 0.0,
            value: 0.0,
        }
    }

    pub fn trigger(&mut self, params: ModEnvParams) {
        self.params = params;
        self.state = State::Delay;
        self.samples_in_state = 0;
        self.value = 0.0;
        trace!("modulation envelope triggered: {:?}", params);
    }

    pub fn release(&mut self) {
        if self.state == State::Release || self.state == State::Finished {
            return;
        }
        self.release_start_value = self.value;
        self.state = State::Release;
        self.samples_in_state = 0;
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Advances the envelope by one sample and returns its current
    /// `0.0..=1.0` output.
    pub fn next_sample(&mut self) -> Float {
        if self.state == State::Finished {
            return 0.0;
        }
        self.value = match self.state {
            State::Delay => 0.0,
            State::Attack => self.progress(self.params.attack),
            State::Hold => 1.0,
            State::Decay => 1.0 + (self.params.sustain - 1.0) * self.progress(self.params.decay),
            State::Sustain => self.params.sustain,
            State::Release => self.release_start_value * (1.0 - self.progress(self.params.release)),
            State::Finished => 0.0,
        };
        self.advance_state();
        if self.state == State::Release && self.progress(self.params.release) >= 1.0 {
            self.state = State::Finished;
            self.value = 0.0;
        }
        self.value
    }

    /// Advances `n` samples at once, returning the value after the
    /// last one. Used where the pitch/filter computation only needs
    /// one representative value per audio block rather than a sample
    /// stream.
    pub fn advance_block(&mut self, n: usize) -> Float {
        let mut value = self.value;
        for _ in 0..n {
            value = self.next_sample();
        }
        value
    }

    fn seconds_to_samples(&self, seconds: Float) -> i64 {
        (seconds * self.sample_rate).round() as i64
    }

    fn progress(&self, duration: Float) -> Float {
        let duration_samples = self.seconds_to_samples(duration).max(1);
        (self.samples_in_state as Float / duration_samples as Float).clamp(0.0, 1.0)
    }

    fn advance_state(&mut self) {
        self.samples_in_state += 1;
        let duration = match self.state {
            State::Delay => self.params.delay,
            State::Attack => self.params.attack,
            State::Hold => self.params.hold,
            State::Decay => self.params.decay,
            State::Release => self.params.release,
            State::Sustain | State::Finished => return,
        };
        if self.samples_in_state >= self.seconds_to_samples(duration).max(1) {
            self.samples_in_state = 0;
            self.state = match self.state {
                State::Delay => State::Attack,
                State::Attack => State::Hold,
                State::Hold => State::Decay,
                State::Decay => State::Sustain,
                State::Release => State::Finished,
                other => other,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(attack: Float, decay: Float, sustain: Float, release: Float) -> ModEnvParams {
        ModEnvParams {
            delay: 0.0,
            attack,
            hold: 0.0,
            decay,
            sustain,
            release,
        }
    }

    #[test]
    fn reaches_peak_after_attack() {
        let mut env = ModulationEnvelope::new(1000.0);
        env.trigger(params(0.01, 0.01, 0.5, 0.01));
        let mut last = 0.0;
        for _ in 0..10 {
            last = env.next_sample();
        }
        assert!(last > 0.9);
    }

    #[test]
    fn release_decays_to_zero() {
        let mut env = ModulationEnvelope::new(1000.0);
        env.trigger(params(0.001, 0.001, 0.5, 0.01));
        for _ in 0..20 {
            env.next_sample();
        }
        env.release();
        for _ in 0..50 {
            env.next_sample();
        }
        assert!(env.is_finished());
        assert_eq!(env.value, 0.0);
    }
}
