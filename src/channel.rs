//! The per-channel MIDI state machine (§4.5): controller storage,
//! program/bank selection, RPN/NRPN-driven tuning, the sustain-pedal
//! hold set, and the voices this channel exclusively owns.

use log::{debug, info, trace, warn};

use crate::soundfont::{ModulatorInputs, SoundFontBank};
use crate::voice::{Voice, VoiceRenderContext, VoiceStartParams};
use crate::Float;

pub const NUM_CONTROLLERS: usize = 128;

const CC_BANK_SELECT_MSB: u8 = 0;
const CC_MODULATION: u8 = 1;
const CC_DATA_ENTRY_MSB: u8 = 6;
const CC_VOLUME: u8 = 7;
const CC_PAN: u8 = 10;
const CC_EXPRESSION: u8 = 11;
const CC_BANK_SELECT_LSB: u8 = 32;
const CC_DATA_ENTRY_LSB: u8 = 38;
const CC_SUSTAIN: u8 = 64;
const CC_RELEASE_TIME: u8 = 72;
const CC_BRIGHTNESS: u8 = 74;
const CC_EFFECTS1_DEPTH: u8 = 91;
const CC_EFFECTS3_DEPTH: u8 = 93;
const CC_NRPN_LSB: u8 = 98;
const CC_NRPN_MSB: u8 = 99;
const CC_RPN_LSB: u8 = 100;
const CC_RPN_MSB: u8 = 101;
const CC_ALL_SOUND_OFF: u8 = 120;
const CC_RESET_ALL_CONTROLLERS: u8 = 121;
const CC_ALL_NOTES_OFF: u8 = 123;

const RPN_PITCH_BEND_RANGE: u16 = 0;
const RPN_FINE_TUNING: u16 = 1;
const RPN_COARSE_TUNING: u16 = 2;
const RPN_NULL: u16 = 0x3FFF;

/// GM power-on controller defaults (§3): main volume 100, expression
/// 127, pan 64 (center), release time 64, brightness 64, effects1
/// (reverb send) depth 40; everything else starts at 0.
fn default_controller_value(cc: u8) -> u8 {
    match cc {
        CC_VOLUME => 100,
        CC_PAN => 64,
        CC_EXPRESSION => 127,
        CC_RELEASE_TIME => 64,
        CC_BRIGHTNESS => 64,
        CC_EFFECTS1_DEPTH => 40,
        _ => 0,
    }
}

pub struct Channel {
    pub number: u8,
    sample_rate: u32,
    bank: u16,
    program: u8,
    percussion: bool,

    controllers: [u8; NUM_CONTROLLERS],
    locked_controllers: [bool; NUM_CONTROLLERS],
    pitch_wheel: i16,
    pitch_wheel_sensitivity_semitones: u8,
    channel_pressure: u8,

    coarse_tune_semitones: i16,
    fine_tune_cents: i16,
    rpn: Option<u16>,
    nrpn_active: bool,

    voices: Vec<Voice>,
}

impl Channel {
    pub fn new(number: u8, sample_rate: u32) -> Channel {
        let mut channel = Channel {
            number,
            sample_rate,
            bank: 0,
            program: 0,
            percussion: number == 9,
            controllers: [0; NUM_CONTROLLERS],
            locked_controllers: [false; NUM_CONTROLLERS],
            pitch_wheel: 0,
            pitch_wheel_sensitivity_semitones: 2,
            channel_pressure: 0,
            coarse_tune_semitones: 0,
            fine_tune_cents: 0,
            rpn: None,
            nrpn_active: false,
            voices: Vec::new(),
        };
        channel.reset_all_controllers();
        channel
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> &mut [Voice] {
        &mut self.voices
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Removes every voice that has reached perceived silence. Called
    /// once per block after rendering.
    pub fn retain_unfinished_voices(&mut self) {
        self.voices.retain(|v| !v.is_finished());
    }

    pub fn remove_voice(&mut self, index: usize) {
        if index < self.voices.len() {
            self.voices.remove(index);
        }
    }

    pub fn hold_pedal(&self) -> bool {
        self.controllers[CC_SUSTAIN as usize] >= 64
    }

    pub fn bank(&self) -> u16 {
        self.bank
    }

    pub fn program(&self) -> u8 {
        self.program
    }

    pub fn controller(&self, cc: u8) -> u8 {
        self.controllers[cc as usize & 0x7f]
    }

    /// Restores power-on defaults for every controller whose bit is
    /// not set in `locked_controllers`, per the `resetAllControllers`
    /// invariant in §8.
    pub fn reset_all_controllers(&mut self) {
        for cc in 0..NUM_CONTROLLERS {
            if !self.locked_controllers[cc] {
                self.controllers[cc] = default_controller_value(cc as u8);
            }
        }
        self.pitch_wheel = 0;
        self.channel_pressure = 0;
        self.rpn = None;
        self.nrpn_active = false;
        info!("channel {}: all controllers reset", self.number);
    }

    /// Power-on reset (MIDI System Reset): controllers, program/bank
    /// and all active sound return to defaults.
    pub fn system_reset(&mut self) {
        self.locked_controllers = [false; NUM_CONTROLLERS];
        self.reset_all_controllers();
        self.bank = 0;
        self.program = 0;
        self.voices.clear();
        info!("channel {}: system reset", self.number);
    }

    pub fn set_program(&mut self, program: u8) {
        self.program = program;
        info!("channel {}: program change -> {}", self.number, program);
    }

    pub fn set_pitch_wheel(&mut self, value: i16) {
        self.pitch_wheel = value;
        trace!("channel {}: pitch wheel -> {}", self.number, value);
    }

    pub fn pitch_wheel(&self) -> i16 {
        self.pitch_wheel
    }

    pub fn set_channel_pressure(&mut self, pressure: u8) {
        self.channel_pressure = pressure;
    }

    pub fn lock_controller(&mut self, cc: u8, locked: bool) {
        self.locked_controllers[cc as usize & 0x7f] = locked;
    }

    /// Dispatches a Control Change message (§4.5). Controller `value`
    /// is stored unconditionally (for custom/unlisted controllers),
    /// then any special-cased side effect is applied.
    pub fn control_change(&mut self, cc: u8, value: u8) {
        let cc = cc & 0x7f;
        self.controllers[cc as usize] = value;

        match cc {
            CC_BANK_SELECT_MSB => self.bank = (self.bank & 0x7f) | ((value as u16) << 7),
            CC_BANK_SELECT_LSB => self.bank = (self.bank & !0x7f) | value as u16,
            CC_RPN_MSB => self.rpn = Some(((value as u16) << 7) | self.rpn.map(|r| r & 0x7f).unwrap_or(0)),
            CC_RPN_LSB => {
                self.rpn = Some((self.rpn.map(|r| r & !0x7f).unwrap_or(0)) | value as u16);
                self.nrpn_active = false;
            }
            CC_NRPN_MSB | CC_NRPN_LSB => {
                self.nrpn_active = true;
            }
            CC_DATA_ENTRY_MSB => self.apply_data_entry(value),
            CC_DATA_ENTRY_LSB => {} // fine-resolution RPN data is not needed by any parameter this crate models.
            CC_SUSTAIN => {
                if value < 64 {
                    self.release_sustained_voices();
                }
            }
            CC_ALL_SOUND_OFF => self.all_sound_off(),
            CC_ALL_NOTES_OFF => self.all_notes_off(),
            CC_RESET_ALL_CONTROLLERS => self.reset_all_controllers(),
            _ => {}
        }
    }

    fn apply_data_entry(&mut self, value: u8) {
        if self.nrpn_active {
            return; // no NRPN-addressed parameters modeled.
        }
        match self.rpn {
            Some(RPN_PITCH_BEND_RANGE) => {
                self.pitch_wheel_sensitivity_semitones = value;
                info!("channel {}: pitch bend range -> {} semitones", self.number, value);
            }
            Some(RPN_FINE_TUNING) => {
                // Data entry MSB alone gives ~100 cent resolution, matching
                // the precision this crate tracks (see CC_DATA_ENTRY_LSB).
                self.fine_tune_cents = (value as i16 - 64) * 100 / 64;
            }
            Some(RPN_COARSE_TUNING) => {
                self.coarse_tune_semitones = value as i16 - 64;
            }
            Some(RPN_NULL) | None => {}
            Some(other) => trace!("channel {}: data entry for unmodeled RPN {}", self.number, other),
        }
    }

    fn release_sustained_voices(&mut self) {
        for voice in self.voices.iter_mut().filter(|v| v.sustained) {
            voice.sustained = false;
            voice.note_off();
        }
        debug!("channel {}: sustain released", self.number);
    }

    fn all_sound_off(&mut self) {
        debug!("channel {}: all sound off, {} voices killed", self.number, self.voices.len());
        self.voices.clear();
    }

    fn all_notes_off(&mut self) {
        debug!("channel {}: all notes off", self.number);
        for voice in self.voices.iter_mut() {
            voice.sustained = false;
            voice.note_off();
        }
    }

    /// Note-on per §4.5: velocity 0 is a note-off; otherwise every
    /// matching preset/instrument zone pair spawns one voice, with
    /// exclusive-class voices silencing their same-class siblings.
    pub fn note_on(&mut self, key: u8, velocity: u8, bank_data: &dyn SoundFontBank, now_samples: u64) {
        if velocity == 0 {
            self.note_off(key);
            return;
        }

        let preset = match bank_data.preset(self.bank, self.program) {
            Some(p) => p,
            None => {
                warn!(
                    "channel {}: no preset for bank={} program={}, note-on dropped",
                    self.number, self.bank, self.program
                );
                return;
            }
        };

        let zones = bank_data.resolve_zones(preset, key, velocity);
        if zones.is_empty() {
            trace!("channel {}: no zone matched key={} velocity={}", self.number, key, velocity);
            return;
        }

        let inputs = self.modulator_inputs();
        for zone in &zones {
            let exclusive_class = zone.generators.get(crate::soundfont::GeneratorType::ExclusiveClass);
            if exclusive_class != 0 {
                for other in self.voices.iter_mut().filter(|v| v.exclusive_class == exclusive_class) {
                    other.force_release();
                }
            }

            let sample = bank_data.sample(zone.sample).clone();
            let mut voice = Voice::new(self.sample_rate);
            voice.start(
                VoiceStartParams {
                    key,
                    velocity,
                    channel: self.number as usize,
                    zone,
                    sample,
                    inputs: &inputs,
                },
                now_samples,
            );
            self.voices.push(voice);
        }
        debug!("channel {}: note-on key={} velocity={}, {} voice(s) started", self.number, key, velocity, zones.len());
    }

    /// Note-off per §4.5: a held sustain pedal moves the voice into
    /// the sustained set instead of releasing it immediately.
    pub fn note_off(&mut self, key: u8) {
        let hold = self.hold_pedal();
        for voice in self.voices.iter_mut().filter(|v| v.key() == key && !v.is_in_release() && !v.sustained) {
            if hold {
                voice.sustained = true;
            } else {
                voice.note_off();
            }
        }
    }

    pub fn poly_pressure(&mut self, _key: u8, _pressure: u8) {
        // No per-key pressure destinations are modeled by the default
        // modulator set (only channel pressure is); stored for parity
        // with the MIDI message surface but otherwise inert.
    }

    fn modulator_inputs(&self) -> ModulatorInputs {
        ModulatorInputs {
            velocity: 0,
            key: 0,
            poly_pressure: 0,
            channel_pressure: self.channel_pressure,
            pitch_wheel: self.pitch_wheel,
            pitch_wheel_sensitivity: self.pitch_wheel_sensitivity_semitones,
            controllers: self.controllers,
        }
    }

    /// Pitch bend itself reaches the voice through the MIDI pitch wheel
    /// default modulator (see `modulator_inputs`, `Voice::compute_pitch_cents`),
    /// not through this context — only channel-level tuning that isn't
    /// modeled as a modulator source belongs here.
    pub fn render_context(&self) -> VoiceRenderContext {
        VoiceRenderContext {
            channel_tuning_cents: self.coarse_tune_semitones as Float * 100.0 + self.fine_tune_cents as Float,
            hold_pedal: self.hold_pedal(),
        }
    }

    pub fn render_block(
        &mut self,
        len: usize,
        dry_l: &mut [Float],
        dry_r: &mut [Float],
        reverb: &mut [Float],
        chorus: &mut [Float],
    ) {
        let ctx = self.render_context();
        let inputs = self.modulator_inputs();
        for voice in self.voices.iter_mut() {
            voice.render_block(&ctx, &inputs, len, dry_l, dry_r, reverb, chorus);
        }
        self.retain_unfinished_voices();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soundfont::testutil::SineBank;

    #[test]
    fn defaults_match_gm_power_on_table() {
        let channel = Channel::new(0, 44100);
        assert_eq!(channel.controller(CC_VOLUME), 100);
        assert_eq!(channel.controller(CC_PAN), 64);
        assert_eq!(channel.controller(CC_EXPRESSION), 127);
        assert_eq!(channel.controller(CC_EFFECTS1_DEPTH), 40);
        assert_eq!(channel.controller(CC_SUSTAIN), 0);
    }

    #[test]
    fn reset_all_controllers_preserves_locked_bits() {
        let mut channel = Channel::new(0, 44100);
        channel.control_change(CC_VOLUME, 10);
        channel.lock_controller(CC_VOLUME, true);
        channel.control_change(CC_RESET_ALL_CONTROLLERS, 0);
        assert_eq!(channel.controller(CC_VOLUME), 10);
        assert_eq!(channel.controller(CC_PAN), 64);
    }

    #[test]
    fn note_on_velocity_zero_is_note_off() {
        let mut channel = Channel::new(0, 48000);
        let bank = SineBank::new(69, 440.0, 48000);
        channel.note_on(69, 100, &bank, 0);
        assert_eq!(channel.voice_count(), 1);
        channel.note_on(69, 0, &bank, 0);
        assert!(channel.voices()[0].is_in_release() || channel.voice_count() == 0);
    }

    #[test]
    fn sustain_pedal_holds_voice_after_note_off() {
        let mut channel = Channel::new(0, 48000);
        let bank = SineBank::new(69, 440.0, 48000);
        channel.control_change(CC_SUSTAIN, 127);
        channel.note_on(60, 100, &bank, 0);
        channel.note_off(60);
        assert!(!channel.voices()[0].is_in_release());
        assert!(channel.voices()[0].sustained);
        channel.control_change(CC_SUSTAIN, 0);
        assert!(channel.voices()[0].is_in_release());
    }

    #[test]
    fn all_notes_off_releases_every_voice() {
        let mut channel = Channel::new(0, 48000);
        let bank = SineBank::new(69, 440.0, 48000);
        channel.note_on(60, 100, &bank, 0);
        channel.note_on(64, 100, &bank, 0);
        channel.control_change(CC_ALL_NOTES_OFF, 0);
        assert!(channel.voices().iter().all(|v| v.is_in_release()));
    }

    #[test]
    fn bank_select_msb_and_lsb_combine() {
        let mut channel = Channel::new(0, 44100);
        channel.control_change(CC_BANK_SELECT_MSB, 1);
        channel.control_change(CC_BANK_SELECT_LSB, 2);
        assert_eq!(channel.bank(), (1 << 7) | 2);
    }

    #[test]
    fn pitch_bend_range_rpn_updates_sensitivity() {
        let mut channel = Channel::new(0, 44100);
        channel.control_change(CC_RPN_MSB, 0);
        channel.control_change(CC_RPN_LSB, 0);
        channel.control_change(CC_DATA_ENTRY_MSB, 12);
        assert_eq!(channel.pitch_wheel_sensitivity_semitones, 12);
    }
}
