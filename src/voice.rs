//! The per-voice sample generator (§4.4): pitch computation, loop-aware
//! linear interpolation, filter, envelopes, LFOs, pan and the
//! reverb/chorus sends. One `Voice` plays exactly one SoundFont sample
//! for the lifetime of a note.

use log::{debug, trace};

use crate::envelope::{VolEnvParams, VolumeEnvelope};
use crate::filter::Filter;
use crate::lfo::{Lfo, LfoParams};
use crate::mod_envelope::{ModEnvParams, ModulationEnvelope};
use crate::soundfont::{
    default_modulators, GeneratorAmounts, GeneratorType, LoopMode, Modulator, ModulatorDestination, ModulatorInputs,
    ResolvedZone, Sample, NUM_GENERATORS,
};
use crate::units::pan_to_gains;
use crate::Float;

/// Everything a [`Voice`] needs from its owning channel to start a new
/// note; gathered by the channel so the voice itself never reaches
/// back up to it (§9 "cyclic references").
pub struct VoiceStartParams<'a> {
    pub key: u8,
    pub velocity: u8,
    pub channel: usize,
    pub zone: &'a ResolvedZone,
    pub sample: Sample,
    pub inputs: &'a ModulatorInputs,
}

/// Per-block context supplied by the channel/synth: everything that can
/// change between notes but is shared across every voice on a channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct VoiceRenderContext {
    pub channel_tuning_cents: Float,
    pub hold_pedal: bool,
}

/// Minimum audible samples before a release request actually releases
/// the voice, avoiding a pop on a just-triggered, just-released note.
const MIN_VOICE_SAMPLES: u64 = 64;

pub struct Voice {
    sample: Sample,
    base_generators: GeneratorAmounts,
    modulators: Vec<Modulator>,
    modulated_generators: GeneratorAmounts,
    /// Cents contributed by modulators that target pitch directly
    /// (the MIDI pitch wheel default modulator) rather than a
    /// generator; recomputed alongside `modulated_generators`.
    modulated_pitch_cents: Float,

    key: u8,
    velocity: u8,
    pub channel: usize,
    pub exclusive_class: i16,

    current_sample_index: f64,
    playback_step: f64,
    loop_mode: LoopMode,

    release_requested: bool,
    is_in_release: bool,
    finished: bool,
    samples_rendered: u64,
    start_time_samples: u64,
    /// Set by the owning channel while the note is held by the
    /// sustain pedal rather than released (§4.5 `sustainedVoices`).
    pub sustained: bool,

    output_sample_rate: Float,
    vol_env: VolumeEnvelope,
    mod_env: ModulationEnvelope,
    vib_lfo: Lfo,
    mod_lfo: Lfo,
    filter: Filter,

    previous_gain_l: Float,
    previous_gain_r: Float,
    previous_reverb_send: Float,
    previous_chorus_send: Float,
}

impl Voice {
    pub fn new(output_sample_rate: u32) -> Voice {
        let sample_rate = output_sample_rate as Float;
        Voice {
            sample: Sample {
                pcm: std::sync::Arc::from(Vec::new().into_boxed_slice()),
                sample_rate: output_sample_rate,
                loop_start: 0,
                loop_end: 0,
                original_pitch: 60,
                pitch_correction: 0,
                linked_sample_index: None,
                sample_type: crate::soundfont::SampleType::Mono,
            },
            base_generators: GeneratorAmounts::zero(),
            modulators: Vec::new(),
            modulated_generators: GeneratorAmounts::zero(),
            modulated_pitch_cents: 0.0,
            key: 0,
            velocity: 0,
            channel: 0,
            exclusive_class: 0,
            current_sample_index: 0.0,
            playback_step: 1.0,
            loop_mode: LoopMode::NoLoop,
            release_requested: false,
            is_in_release: false,
            finished: true,
            samples_rendered: 0,
            start_time_samples: 0,
            sustained: false,
            output_sample_rate: sample_rate,
            vol_env: VolumeEnvelope::new(sample_rate),
            mod_env: ModulationEnvelope::new(sample_rate),
            vib_lfo: Lfo::new(sample_rate),
            mod_lfo: Lfo::new(sample_rate),
            filter: Filter::new(sample_rate),
            previous_gain_l: 0.0,
            previous_gain_r: 0.0,
            previous_reverb_send: 0.0,
            previous_chorus_send: 0.0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn is_in_release(&self) -> bool {
        self.is_in_release
    }

    /// Current attenuation in decibels, used by the voice-cap eviction
    /// policy (§4.5: kill the oldest, highest-attenuation voices).
    pub fn current_attenuation_db(&self) -> Float {
        self.vol_env.current_attenuation_db()
    }

    pub fn start_time_samples(&self) -> u64 {
        self.start_time_samples
    }

    /// (Re)starts this voice for a new note-on, combining the zone's
    /// modulators with the ten SF2 default modulators (a zone modulator
    /// with the same source/destination/secondary overrides its
    /// default rather than stacking with it).
    pub fn start(&mut self, p: VoiceStartParams, now_samples: u64) {
        self.sample = p.sample;
        self.base_generators = p.zone.generators;
        self.modulators = combine_with_defaults(&p.zone.modulators);
        self.key = p.key;
        self.velocity = p.velocity;
        self.channel = p.channel;
        self.loop_mode = LoopMode::from_generator(&self.base_generators);
        self.exclusive_class = self.base_generators.get(GeneratorType::ExclusiveClass);

        self.recompute_modulated_generators(p.inputs);

        let g = self.modulated_generators;
        self.vol_env.trigger(VolEnvParams::from_generators(&g, p.key));
        self.mod_env.trigger(ModEnvParams::from_generators(&g, p.key));
        self.vib_lfo.trigger(LfoParams::new(
            g.get(GeneratorType::DelayVibLfo),
            crate::units::absolute_cents_to_hz(g.get(GeneratorType::FreqVibLfo) as Float),
        ));
        self.mod_lfo.trigger(LfoParams::new(
            g.get(GeneratorType::DelayModLfo),
            crate::units::absolute_cents_to_hz(g.get(GeneratorType::FreqModLfo) as Float),
        ));
        self.filter.reset();

        self.current_sample_index = generator_start_offset(&self.base_generators) as f64;
        self.playback_step = 1.0;
        self.release_requested = false;
        self.is_in_release = false;
        self.finished = false;
        self.samples_rendered = 0;
        self.start_time_samples = now_samples;
        self.sustained = false;
        self.previous_gain_l = 0.0;
        self.previous_gain_r = 0.0;
        self.previous_reverb_send = 0.0;
        self.previous_chorus_send = 0.0;

        trace!(
            "voice start: channel={} key={} velocity={} exclusive_class={}",
            self.channel, self.key, self.velocity, self.exclusive_class
        );
    }

    /// Requests release. Actually entering the release state is
    /// deferred while the hold pedal is down or the voice is too young
    /// to release without popping; see [`Self::render_block`].
    pub fn note_off(&mut self) {
        self.release_requested = true;
    }

    /// Forces the voice into release immediately, bypassing the hold
    /// pedal — used for exclusive-class stealing and `allSoundOff`.
    pub fn force_release(&mut self) {
        if self.finished || self.is_in_release {
            return;
        }
        self.vol_env.release();
        self.mod_env.release();
        self.is_in_release = true;
        self.release_requested = true;
    }

    fn release_if_due(&mut self, hold_pedal: bool) {
        if self.is_in_release || self.finished {
            return;
        }
        if self.samples_rendered < MIN_VOICE_SAMPLES {
            return;
        }
        if self.release_requested && !hold_pedal {
            self.vol_env.release();
            self.mod_env.release();
            self.is_in_release = true;
        }
    }

    /// Renders `len` samples into the dry/reverb/chorus buses,
    /// accumulating (not overwriting) so multiple voices can share a
    /// bus. Pitch, filter cutoff and send levels are recomputed once
    /// per block (matching the reference engines in the retrieval
    /// pack); the volume envelope and filter state advance sample by
    /// sample so zippering stays controlled.
    #[allow(clippy::too_many_arguments)]
    pub fn render_block(
        &mut self,
        ctx: &VoiceRenderContext,
        inputs: &ModulatorInputs,
        len: usize,
        dry_l: &mut [Float],
        dry_r: &mut [Float],
        reverb: &mut [Float],
        chorus: &mut [Float],
    ) {
        if self.finished {
            return;
        }

        self.release_if_due(ctx.hold_pedal);
        self.recompute_modulated_generators(inputs);

        let g = self.modulated_generators;
        let mod_env_block = self.mod_env.advance_block(len);
        let mod_lfo_block = self.mod_lfo.advance_block(len);
        let vib_lfo_block = self.vib_lfo.advance_block(len);

        let pitch_cents = self.compute_pitch_cents(&g, ctx, mod_env_block, mod_lfo_block, vib_lfo_block);
        self.playback_step =
            2.0_f64.powf(pitch_cents / 1200.0) * self.sample.sample_rate as f64 / self.output_sample_rate as f64;

        let cutoff_cents = (g.get(GeneratorType::InitialFilterFc) as Float
            + g.get(GeneratorType::ModEnvToFilterFc) as Float * mod_env_block
            + g.get(GeneratorType::ModLfoToFilterFc) as Float * mod_lfo_block)
            .clamp(1500.0, 13500.0);
        let resonance_cb = g.get(GeneratorType::InitialFilterQ).max(0) as Float;

        let pan = g.get(GeneratorType::Pan) as Float / 10.0; // tenths of a percent -> SF2's -500..500 range.
        let (gain_l, gain_r) = pan_to_gains(pan.clamp(-500.0, 500.0));
        let reverb_send = (g.get(GeneratorType::ReverbEffectsSend) as Float / 1000.0).clamp(0.0, 1.0);
        let chorus_send = (g.get(GeneratorType::ChorusEffectsSend) as Float / 1000.0).clamp(0.0, 1.0);

        for i in 0..len {
            if self.finished {
                break;
            }
            let raw = self.interpolate_sample();
            let filtered = self.filter.process(raw, cutoff_cents, resonance_cb);
            let env_gain = self.vol_env.next_sample();
            if self.vol_env.is_finished() {
                self.finished = true;
            }
            let sample = filtered * env_gain;

            // Ramp from the previous block's pan/send gains to this
            // block's over the block, so a generator change never
            // introduces a step discontinuity.
            let ramp = ((i as Float + 1.0) / len.max(1) as Float).min(1.0);
            let l = self.previous_gain_l + (gain_l - self.previous_gain_l) * ramp;
            let r = self.previous_gain_r + (gain_r - self.previous_gain_r) * ramp;
            let rs = self.previous_reverb_send + (reverb_send - self.previous_reverb_send) * ramp;
            let cs = self.previous_chorus_send + (chorus_send - self.previous_chorus_send) * ramp;

            dry_l[i] += sample * l;
            dry_r[i] += sample * r;
            reverb[i] += sample * rs;
            chorus[i] += sample * cs;

            self.advance_position();
            self.samples_rendered += 1;
        }

        self.previous_gain_l = gain_l;
        self.previous_gain_r = gain_r;
        self.previous_reverb_send = reverb_send;
        self.previous_chorus_send = chorus_send;

        if self.finished {
            debug!("voice finished: channel={} key={}", self.channel, self.key);
        }
    }

    fn interpolate_sample(&self) -> Float {
        let pcm = &self.sample.pcm;
        if pcm.is_empty() {
            return 0.0;
        }
        let index = self.current_sample_index;
        let i0 = index.floor() as i64;
        let frac = index - i0 as f64;
        let len = pcm.len() as i64;

        let s0 = pcm_at(pcm, i0, len, self.loop_mode, self.sample.loop_start, self.sample.loop_end);
        let s1 = pcm_at(pcm, i0 + 1, len, self.loop_mode, self.sample.loop_start, self.sample.loop_end);
        let a = s0 as Float / i16::MAX as Float;
        let b = s1 as Float / i16::MAX as Float;
        a + (b - a) * frac
    }

    fn advance_position(&mut self) {
        self.current_sample_index += self.playback_step;
        let loop_start = self.sample.loop_start as f64;
        let loop_end = self.sample.loop_end as f64;
        let looping = match self.loop_mode {
            LoopMode::Continuous => true,
            LoopMode::LoopUntilRelease => !self.is_in_release,
            LoopMode::NoLoop => false,
        };
        if looping && loop_end > loop_start {
            while self.current_sample_index >= loop_end {
                self.current_sample_index -= loop_end - loop_start;
            }
        } else if self.current_sample_index >= self.sample.len() as f64 {
            self.finished = true;
        }
    }

    fn compute_pitch_cents(
        &self,
        g: &GeneratorAmounts,
        ctx: &VoiceRenderContext,
        mod_env_value: Float,
        mod_lfo_value: Float,
        vib_lfo_value: Float,
    ) -> Float {
        let root = self.root_key() as Float;
        let scale_tuning = g.get(GeneratorType::ScaleTuning) as Float;
        let coarse = g.get(GeneratorType::CoarseTune) as Float;
        let fine = g.get(GeneratorType::FineTune) as Float;

        scale_tuning * (self.key as Float - root)
            + coarse * 100.0
            + fine
            + self.sample.pitch_correction as Float
            + ctx.channel_tuning_cents
            + self.modulated_pitch_cents
            + g.get(GeneratorType::ModEnvToPitch) as Float * mod_env_value
            + g.get(GeneratorType::ModLfoToPitch) as Float * mod_lfo_value
            + g.get(GeneratorType::VibLfoToPitch) as Float * vib_lfo_value
    }

    fn root_key(&self) -> u8 {
        let overriding = self.modulated_generators.get(GeneratorType::OverridingRootKey);
        if overriding >= 0 {
            overriding as u8
        } else {
            self.sample.original_pitch
        }
    }

    /// Sums every modulator's contribution onto the base generator
    /// vector. Recomputed every block rather than tracked per-source,
    /// trading a constant-factor cost (tens of modulators, 60
    /// generators) for the simplicity of never needing dependency
    /// tracking (§4.5 modulator engine).
    fn recompute_modulated_generators(&mut self, inputs: &ModulatorInputs) {
        let mut full_inputs = *inputs;
        full_inputs.velocity = self.velocity;
        full_inputs.key = self.key;

        let mut offsets = [0.0 as Float; NUM_GENERATORS];
        let mut pitch_cents = 0.0;
        for m in &self.modulators {
            match m.destination {
                ModulatorDestination::Generator(gt) => offsets[gt.index()] += m.evaluate(&full_inputs),
                ModulatorDestination::Pitch => pitch_cents += m.evaluate(&full_inputs),
            }
        }
        self.modulated_pitch_cents = pitch_cents;

        let mut gens = self.base_generators;
        for (i, offset) in offsets.iter().enumerate() {
            if *offset == 0.0 {
                continue;
            }
            if let Some(gt) = GeneratorType::from_index(i) {
                let value = (gens.get(gt) as Float + offset).clamp(i16::MIN as Float, i16::MAX as Float);
                gens.set(gt, value.round() as i16);
            }
        }
        self.modulated_generators = gens;
    }
}

fn pcm_at(pcm: &[i16], index: i64, len: i64, loop_mode: LoopMode, loop_start: u32, loop_end: u32) -> i16 {
    if index >= 0 && index < len {
        return pcm[index as usize];
    }
    match loop_mode {
        LoopMode::NoLoop => 0,
        LoopMode::Continuous | LoopMode::LoopUntilRelease => {
            let span = (loop_end as i64 - loop_start as i64).max(1);
            let wrapped = loop_start as i64 + (index - loop_start as i64).rem_euclid(span);
            pcm[wrapped.clamp(0, len - 1) as usize]
        }
    }
}

fn generator_start_offset(generators: &GeneratorAmounts) -> i32 {
    generators.get(GeneratorType::StartAddrsOffset) as i32
        + generators.get(GeneratorType::StartAddrsCoarseOffset) as i32 * 32768
}

fn combine_with_defaults(zone_modulators: &[Modulator]) -> Vec<Modulator> {
    let mut combined: Vec<Modulator> = default_modulators()
        .into_iter()
        .filter(|d| !zone_modulators.iter().any(|z| same_modulator_key(d, z)))
        .collect();
    combined.extend(zone_modulators.iter().cloned());
    combined
}

fn same_modulator_key(a: &Modulator, b: &Modulator) -> bool {
    a.destination == b.destination && a.source == b.source && a.secondary_source == b.secondary_source
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soundfont::testutil::SineBank;
    use crate::soundfont::SoundFontBank;

    fn start_voice(voice: &mut Voice, bank: &SineBank, key: u8, velocity: u8) {
        let preset = bank.preset(0, 0).unwrap();
        let zones = bank.resolve_zones(preset, key, velocity);
        let zone = &zones[0];
        let sample = bank.sample(zone.sample).clone();
        let inputs = ModulatorInputs::default();
        voice.start(
            VoiceStartParams {
                key,
                velocity,
                channel: 0,
                zone,
                sample,
                inputs: &inputs,
            },
            0,
        );
    }

    #[test]
    fn renders_without_panicking_and_produces_nonzero_signal() {
        let sample_rate = 48_000;
        let bank = SineBank::new(69, 440.0, sample_rate);
        let mut voice = Voice::new(sample_rate);
        start_voice(&mut voice, &bank, 69, 127);

        let ctx = VoiceRenderContext::default();
        let inputs = ModulatorInputs::default();
        let len = 256;
        let mut l = vec![0.0; len];
        let mut r = vec![0.0; len];
        let mut rv = vec![0.0; len];
        let mut ch = vec![0.0; len];
        for _ in 0..20 {
            voice.render_block(&ctx, &inputs, len, &mut l, &mut r, &mut rv, &mut ch);
        }
        assert!(l.iter().any(|s| s.abs() > 1e-4));
    }

    #[test]
    fn note_off_eventually_finishes_the_voice() {
        let sample_rate = 48_000;
        let bank = SineBank::new(69, 440.0, sample_rate);
        let mut voice = Voice::new(sample_rate);
        start_voice(&mut voice, &bank, 69, 127);

        let ctx = VoiceRenderContext::default();
        let inputs = ModulatorInputs::default();
        let len = 256;
        let mut l = vec![0.0; len];
        let mut r = vec![0.0; len];
        let mut rv = vec![0.0; len];
        let mut ch = vec![0.0; len];
        // Let the voice play a little before releasing, matching the
        // minimum-voice-age guard.
        for _ in 0..4 {
            voice.render_block(&ctx, &inputs, len, &mut l, &mut r, &mut rv, &mut ch);
        }
        voice.note_off();
        for _ in 0..400 {
            voice.render_block(&ctx, &inputs, len, &mut l, &mut r, &mut rv, &mut ch);
            if voice.is_finished() {
                break;
            }
        }
        assert!(voice.is_finished());
    }

    #[test]
    fn force_release_overrides_hold_pedal() {
        let sample_rate = 48_000;
        let bank = SineBank::new(69, 440.0, sample_rate);
        let mut voice = Voice::new(sample_rate);
        start_voice(&mut voice, &bank, 69, 127);
        voice.force_release();
        assert!(voice.is_in_release());
    }
}
