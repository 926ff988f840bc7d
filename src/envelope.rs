//! The six-stage DAHDSR volume envelope (§4.2). Output is a linear
//! gain in `0.0..=1.0`; internally the envelope reasons in decibels of
//! attenuation so that decay/release stay linear-in-dB as the spec
//! requires, with a low-pass smoothing pass to avoid zippering at
//! state transitions.

use log::trace;

use crate::soundfont::{GeneratorAmounts, GeneratorType};
use crate::units::{decibels_to_gain, gain_to_decibels, timecents_to_seconds, PERCEIVED_SILENCE_DB};
use crate::Float;

/// Attenuation implied by total silence, used as the release target.
const FULL_ATTENUATION_DB: Float = 100.0;

/// Smoothing factor applied to the envelope's dB output each sample,
/// normal operation.
const SMOOTH_ALPHA: Float = 0.001;

/// Release smoothing is ten times faster so the envelope can still
/// reach silence within a very short release time.
const SMOOTH_ALPHA_RELEASE: Float = 0.01;

#[derive(Clone, Copy, Debug)]
pub struct VolEnvParams {
    pub delay: Float,
    pub attack: Float,
    pub hold: Float,
    pub decay: Float,
    pub sustain_db: Float,
    pub release: Float,
    pub attenuation_db: Float,
}

impl VolEnvParams {
    pub fn from_generators(generators: &GeneratorAmounts, key: u8) -> VolEnvParams {
        let hold_tc = generators.get(GeneratorType::HoldVolEnv) as i32
            + generators.get(GeneratorType::KeynumToVolEnvHold) as i32 * (60 - key as i32);
        let decay_tc = generators.get(GeneratorType::DecayVolEnv) as i32
            + generators.get(GeneratorType::KeynumToVolEnvDecay) as i32 * (60 - key as i32);

        // The SF2 spec clamps sustain to <= 1000 cB; clamp at ingest
        // rather than letting a malformed zone drive the decay-duration
        // formula negative later on (§9 Open Questions).
        let sustain_cb = generators.get(GeneratorType::SustainVolEnv).clamp(0, 1000) as Float;

        VolEnvParams {
            delay: timecents_to_seconds(generators.get(GeneratorType::DelayVolEnv)),
            attack: timecents_to_seconds(generators.get(GeneratorType::AttackVolEnv)),
            hold: timecents_to_seconds(hold_tc.clamp(i16::MIN as i32, i16::MAX as i32) as i16),
            decay: timecents_to_seconds(decay_tc.clamp(i16::MIN as i32, i16::MAX as i32) as i16),
            sustain_db: sustain_cb / 10.0,
            release: timecents_to_seconds(generators.get(GeneratorType::ReleaseVolEnv)),
            attenuation_db: generators.get(GeneratorType::InitialAttenuation) as Float / 10.0,
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
pub struct VolumeEnvelope {
    sample_rate: Float,
    state: State,
    samples_in_state: i64,
    params: VolEnvParams,
    release_start_db: Float,
    current_db: Float,
}

impl VolumeEnvelope {
    pub fn new(sample_rate: Float) -> VolumeEnvelope {
        VolumeEnvelope {
            sample_rate,
            state: State::Finished,
            samples_in_state: 0,
            params: VolEnvParams {
                delay: 0.0,
                attack: 0.0,
                hold: 0.0,
                decay: 0.0,
                sustain_db: 0.0,
                release: 0.0,
                attenuation_db: 0.0,
            },
            release_start_db: FULL_ATTENUATION_DB,
            current_db: FULL_ATTENUATION_DB,
        }
    }

    pub fn trigger(&mut self, params: VolEnvParams) {
        self.params = params;
        self.state = State::Delay;
        self.samples_in_state = 0;
        self.current_db = FULL_ATTENUATION_DB;
        trace!("volume envelope triggered: {:?}", params);
    }

    pub fn release(&mut self) {
        if self.state == State::Release || self.state == State::Finished {
            return;
        }
        self.release_start_db = self.ideal_db();
        self.state = State::Release;
        self.samples_in_state = 0;
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// The envelope's current smoothed attenuation in decibels, used
    /// by the voice-cap eviction policy (§4.5) without advancing state.
    pub fn current_attenuation_db(&self) -> Float {
        self.current_db
    }

    /// Advances the envelope by one sample and returns the smoothed
    /// linear gain to apply to the voice's output.
    pub fn next_sample(&mut self) -> Float {
        if self.state == State::Finished {
            return 0.0;
        }

        let ideal = self.ideal_db();
        let alpha = if self.state == State::Release {
            SMOOTH_ALPHA_RELEASE
        } else {
            SMOOTH_ALPHA
        };
        self.current_db += (ideal - self.current_db) * alpha;

        self.advance_state();

        if self.state == State::Release && self.current_db >= PERCEIVED_SILENCE_DB {
            self.state = State::Finished;
            return 0.0;
        }

        decibels_to_gain(self.current_db.min(FULL_ATTENUATION_DB))
    }

    fn seconds_to_samples(&self, seconds: Float) -> i64 {
        (seconds * self.sample_rate).round() as i64
    }

    fn progress(&self, duration: Float) -> Float {
        let duration_samples = self.seconds_to_samples(duration).max(1);
        (self.samples_in_state as Float / duration_samples as Float).clamp(0.0, 1.0)
    }

    /// The envelope's target dB value for *this instant*, before
    /// smoothing — used both by `next_sample` and to derive the
    /// release-start dB per §4.2.
    fn ideal_db(&self) -> Float {
        match self.state {
            State::Delay => FULL_ATTENUATION_DB,
            State::Attack => {
                let peak_gain = decibels_to_gain(self.params.attenuation_db);
                let progress = self.progress(self.params.attack);
                gain_to_decibels((progress * peak_gain).max(1e-9))
            }
            State::Hold => self.params.attenuation_db,
            State::Decay => {
                let progress = self.progress(self.params.decay);
                self.params.attenuation_db + (self.params.sustain_db - self.params.attenuation_db) * progress
            }
            State::Sustain => self.params.sustain_db,
            State::Release => {
                let progress = self.progress(self.params.release);
                self.release_start_db + (FULL_ATTENUATION_DB - self.release_start_db) * progress
            }
            State::Finished => FULL_ATTENUATION_DB,
        }
    }

    fn advance_state(&mut self) {
        self.samples_in_state += 1;
        let duration = match self.state {
            State::Delay => self.params.delay,
            State::Attack => self.params.attack,
            State::Hold => self.params.hold,
            State::Decay => self.params.decay,
            // Release has no duration-based exit: `progress()` clamps at
            // 1.0 once the release time has elapsed, holding `ideal_db`
            // at full attenuation. Finishing is decided solely by the
            // perceived-silence check in `next_sample`, so a release that
            // hasn't actually reached 96 dB yet (short release time, slow
            // smoothing) is never cut off early.
            State::Release | State::Sustain | State::Finished => return,
        };
        if self.samples_in_state >= self.seconds_to_samples(duration).max(1) {
            self.samples_in_state = 0;
            self.state = match self.state {
                State::Delay => State::Attack,
                State::Attack => State::Hold,
                State::Hold => State::Decay,
                State::Decay => State::Sustain,
                other => other,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(attack: Float, decay: Float, sustain_db: Float, release: Float) -> VolEnvParams {
        VolEnvParams {
            delay: 0.0,
            attack,
            hold: 0.0,
            decay,
            sustain_db,
            release,
            attenuation_db: 0.0,
        }
    }

    #[test]
    fn silent_before_trigger() {
        let mut env = VolumeEnvelope::new(44100.0);
        assert_eq!(env.next_sample(), 0.0);
    }

    #[test]
    fn attack_ramps_toward_peak_gain() {
        let mut env = VolumeEnvelope::new(44100.0);
        env.trigger(params(0.1, 0.1, 0.0, 0.1));
        let mut last = 0.0;
        for _ in 0..1000 {
            let g = env.next_sample();
            assert!(g >= last - 1e-6);
            last = g;
        }
    }

    #[test]
    fn release_reaches_silence_and_finishes() {
        let mut env = VolumeEnvelope::new(44100.0);
        env.trigger(params(0.001, 0.001, 0.0, 0.01));
        for _ in 0..500 {
            env.next_sample();
        }
        env.release();
        for _ in 0..(44100 * 2) {
            env.next_sample();
            if env.is_finished() {
                break;
            }
        }
        assert!(env.is_finished());
    }

    #[test]
    fn release_from_sustain_starts_at_sustain_db() {
        let mut env = VolumeEnvelope::new(44100.0);
        env.trigger(params(0.0, 0.0, 6.0, 0.05));
        // Run past attack/hold/decay into sustain.
        for _ in 0..100 {
            env.next_sample();
        }
        env.release();
        assert!((env.release_start_db - 6.0).abs() < 0.5);
    }
}
