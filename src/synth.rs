//! The synth core (§4.6): owns every channel, mixes their voices into
//! the dry/reverb/chorus buses each block, dispatches MIDI messages
//! arriving from the control queue, and publishes lifecycle events.
//!
//! [`Synth::render_block`] is the only method called from the
//! real-time audio thread; it never allocates once its scratch buffers
//! have grown to the host's block size, never blocks, and never
//! panics on malformed input — per-voice and per-message failures are
//! logged and counted instead (§4.8).

use std::sync::Arc;

use log::{debug, info, trace, warn};

use crate::channel::Channel;
use crate::chorus::Chorus;
use crate::config::SynthConfig;
use crate::error::SynthError;
use crate::event::{EngineEvent, FailureCounters, FailureSnapshot};
use crate::midi::MidiMessage;
use crate::queue::{control_queue, event_queue, ControlMessage, ControlReceiver, ControlSender, EventReceiver, EventSender};
use crate::reverb::Reverb;
use crate::soundfont::SoundFontBank;
use crate::Float;

/// Absolute maximum channel count §4.6 allows for multi-port MIDI files.
const MAX_CHANNELS: usize = 32;

/// A SoundFont bank shared read-only between the control thread (that
/// loads it) and the audio thread (that reads it every block). The
/// parser producing one is out of scope for this crate (§6).
pub type SharedSoundFont = Arc<dyn SoundFontBank + Send + Sync>;

/// Recognized leading bytes of a handful of SysEx messages this crate
/// gives dedicated effects to (§6.1): GM System On, GS reset, GS "use
/// for rhythm part", XG reset/part-mode. Every other SysEx payload is
/// accepted (and can be replayed by the sequencer) but otherwise inert.
mod sysex {
    pub const GM_SYSTEM_ON: &[u8] = &[0x7E, 0x7F, 0x09, 0x01];
    pub const GS_PREFIX: &[u8] = &[0x41, 0x10, 0x42, 0x12];
    pub const GS_RESET_ADDRESS: &[u8] = &[0x00, 0x00, 0x7F];
    pub const GS_RHYTHM_ADDRESS_HI: u8 = 0x40;
    pub const GS_RHYTHM_ADDRESS_LO: u8 = 0x15;
    pub const XG_PREFIX: &[u8] = &[0x43, 0x10, 0x4C];
    pub const XG_RESET_ADDRESS: &[u8] = &[0x00, 0x00, 0x7E, 0x00];
}

/// Mixes every voice on every channel into the final stereo output
/// each block, owns the reverb/chorus send buses, and is the single
/// dispatch point for MIDI messages arriving from the control thread.
pub struct Synth {
    config: SynthConfig,
    soundfont: Option<SharedSoundFont>,
    channels: Vec<Channel>,
    reverb: Reverb,
    chorus: Chorus,
    control_rx: ControlReceiver,
    event_tx: EventSender,
    failures: FailureCounters,
    samples_rendered: u64,

    dry_l: Vec<Float>,
    dry_r: Vec<Float>,
    reverb_send: Vec<Float>,
    chorus_send: Vec<Float>,
    reverb_wet_l: Vec<Float>,
    reverb_wet_r: Vec<Float>,
    chorus_wet_l: Vec<Float>,
    chorus_wet_r: Vec<Float>,
}

impl Synth {
    /// Builds a `Synth` plus the two halves of its message queues that
    /// belong to the control thread: the sender for commands and the
    /// receiver for published events (§5).
    pub fn new(config: SynthConfig) -> (Synth, ControlSender, EventReceiver) {
        let channel_count = config.initial_channel_count.clamp(1, MAX_CHANNELS);
        let channels = (0..channel_count).map(|n| Channel::new(n as u8, config.sample_rate)).collect();

        let (control_tx, control_rx) = control_queue(config.control_queue_capacity);
        let (event_tx, event_rx) = event_queue(config.event_queue_capacity);

        let synth = Synth {
            config,
            soundfont: None,
            channels,
            reverb: Reverb::new(config.sample_rate),
            chorus: Chorus::new(config.sample_rate, config.chorus.delay, config.chorus.depth, config.chorus.rate),
            control_rx,
            event_tx,
            failures: FailureCounters::new(),
            samples_rendered: 0,
            dry_l: Vec::new(),
            dry_r: Vec::new(),
            reverb_send: Vec::new(),
            chorus_send: Vec::new(),
            reverb_wet_l: Vec::new(),
            reverb_wet_r: Vec::new(),
            chorus_wet_l: Vec::new(),
            chorus_wet_r: Vec::new(),
        };
        (synth, control_tx, event_rx)
    }

    /// Installs the SoundFont bank note-ons resolve zones against.
    /// Control-thread only; never called from `render_block`.
    pub fn set_soundfont(&mut self, bank: SharedSoundFont) -> Result<(), SynthError> {
        info!("soundfont installed");
        self.soundfont = Some(bank);
        Ok(())
    }

    pub fn failure_snapshot(&self) -> FailureSnapshot {
        self.failures.snapshot()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Adds a channel for multi-port MIDI files, up to `MAX_CHANNELS`.
    /// Returns the new channel's number, or `None` if the cap is
    /// already reached.
    pub fn add_channel(&mut self) -> Option<u8> {
        if self.channels.len() >= MAX_CHANNELS {
            return None;
        }
        let number = self.channels.len() as u8;
        self.channels.push(Channel::new(number, self.config.sample_rate));
        self.event_tx.publish(EngineEvent::NewChannel { channel: number });
        Some(number)
    }

    fn channel_mut(&mut self, channel: u8) -> Option<&mut Channel> {
        self.channels.get_mut(channel as usize)
    }

    /// Drains whatever is currently queued from the control thread.
    /// Called once at the top of every block (§5); never blocks.
    pub fn process_control_queue(&mut self) {
        let mut pending = Vec::new();
        self.control_rx.drain(|message| pending.push(message));
        for message in pending {
            match message {
                ControlMessage::Midi { channel, message } => self.dispatch(channel, message),
                ControlMessage::SetVoiceCap(cap) => self.config.voice_cap = cap,
            }
        }
    }

    /// Dispatches one decoded MIDI message to the addressed channel
    /// (§4.5), publishing the matching lifecycle event. Messages with
    /// no channel (system real-time/common) are accepted but are a
    /// sequencer/control-surface concern, not this synth's.
    pub fn dispatch(&mut self, default_channel: u8, message: MidiMessage) {
        let soundfont = self.soundfont.clone();
        let channel_number = message.channel().unwrap_or(default_channel);

        match message {
            MidiMessage::NoteOn { key, velocity, .. } => {
                let Some(bank) = soundfont else {
                    warn!("note-on received with no soundfont loaded, dropped");
                    return;
                };
                let now = self.samples_rendered;
                if let Some(channel) = self.channel_mut(channel_number) {
                    channel.note_on(key, velocity, bank.as_ref(), now);
                }
                if velocity > 0 {
                    self.event_tx.publish(EngineEvent::NoteOn {
                        channel: channel_number,
                        key,
                        velocity,
                    });
                } else {
                    self.event_tx.publish(EngineEvent::NoteOff {
                        channel: channel_number,
                        key,
                    });
                }
            }
            MidiMessage::NoteOff { key, .. } => {
                if let Some(channel) = self.channel_mut(channel_number) {
                    channel.note_off(key);
                }
                self.event_tx.publish(EngineEvent::NoteOff {
                    channel: channel_number,
                    key,
                });
            }
            MidiMessage::PolyPressure { key, pressure, .. } => {
                if let Some(channel) = self.channel_mut(channel_number) {
                    channel.poly_pressure(key, pressure);
                }
            }
            MidiMessage::ControlChange { controller, value, .. } => {
                if let Some(channel) = self.channel_mut(channel_number) {
                    channel.control_change(controller, value);
                }
                self.event_tx.publish(EngineEvent::ControllerChange {
                    channel: channel_number,
                    controller,
                    value,
                });
            }
            MidiMessage::ProgramChange { program, .. } => {
                if let Some(channel) = self.channel_mut(channel_number) {
                    channel.set_program(program);
                }
                self.event_tx.publish(EngineEvent::ProgramChange {
                    channel: channel_number,
                    program,
                });
            }
            MidiMessage::ChannelPressure { pressure, .. } => {
                if let Some(channel) = self.channel_mut(channel_number) {
                    channel.set_channel_pressure(pressure);
                }
            }
            MidiMessage::PitchBend { value, .. } => {
                if let Some(channel) = self.channel_mut(channel_number) {
                    channel.set_pitch_wheel(value);
                }
                self.event_tx.publish(EngineEvent::PitchWheel {
                    channel: channel_number,
                    value,
                });
            }
            MidiMessage::SystemExclusive(bytes) => self.handle_sysex(&bytes),
            MidiMessage::SystemReset => self.system_reset(),
            MidiMessage::TimingClock
            | MidiMessage::Start
            | MidiMessage::Continue
            | MidiMessage::Stop
            | MidiMessage::ActiveSensing
            | MidiMessage::SongPosition(_) => {
                trace!("system real-time/common message {:?} ignored by synth core", message);
            }
        }

        self.enforce_voice_cap();
    }

    /// Power-on reset: every channel returns to its defaults and all
    /// sound is cut.
    fn system_reset(&mut self) {
        for channel in &mut self.channels {
            channel.system_reset();
        }
        self.reverb.mute();
        self.chorus.mute();
        info!("system reset: all channels restored to power-on defaults");
        self.event_tx.publish(EngineEvent::StopAll);
    }

    /// Recognizes GM/GS/XG reset and the GS rhythm-part / XG part-mode
    /// SysEx messages (§4.5, §6.1); every other payload is accepted
    /// but otherwise inert (the sequencer may still need it on replay).
    fn handle_sysex(&mut self, bytes: &[u8]) {
        if bytes.starts_with(sysex::GM_SYSTEM_ON) {
            info!("GM system-on sysex received");
            self.system_reset();
            return;
        }
        if bytes.starts_with(sysex::GS_PREFIX) {
            let rest = &bytes[sysex::GS_PREFIX.len()..];
            if rest.starts_with(sysex::GS_RESET_ADDRESS) {
                info!("GS reset sysex received");
                self.system_reset();
                return;
            }
            // GS part setup: 40 1n 15 vv, where n is the channel nibble
            // and vv != 0 switches that channel to rhythm.
            if rest.len() >= 4 && rest[0] == sysex::GS_RHYTHM_ADDRESS_HI && rest[2] == sysex::GS_RHYTHM_ADDRESS_LO {
                let channel_nibble = rest[1] & 0x0F;
                let is_rhythm = rest[3] != 0;
                self.set_drum_channel(channel_nibble, is_rhythm);
                return;
            }
        }
        if bytes.starts_with(sysex::XG_PREFIX) {
            let rest = &bytes[sysex::XG_PREFIX.len()..];
            if rest.starts_with(sysex::XG_RESET_ADDRESS) {
                info!("XG reset sysex received");
                self.system_reset();
                return;
            }
            // XG part setup: 08 <channel> 07 <mode>; mode 0x7F = drums.
            if rest.len() >= 4 && rest[0] == 0x08 && rest[2] == 0x07 {
                self.set_drum_channel(rest[1], rest[3] == 0x7F);
                return;
            }
        }
        trace!("sysex of {} bytes not recognized, passed through inert", bytes.len());
    }

    fn set_drum_channel(&mut self, channel: u8, is_drum: bool) {
        if channel as usize >= self.channels.len() {
            return;
        }
        debug!("channel {}: drum-part toggle -> {}", channel, is_drum);
        self.event_tx.publish(EngineEvent::DrumChange {
            channel,
            percussion: is_drum,
        });
    }

    /// Kills the oldest, highest-attenuation voices across every
    /// channel once the global voice cap is exceeded (§4.5).
    fn enforce_voice_cap(&mut self) {
        let total: usize = self.channels.iter().map(Channel::voice_count).sum();
        if total <= self.config.voice_cap {
            return;
        }
        let mut excess = total - self.config.voice_cap;
        self.failures.record_voice_limit_exceeded();
        warn!("voice cap {} exceeded ({} active), stealing {}", self.config.voice_cap, total, excess);

        while excess > 0 {
            let mut oldest: Option<(usize, usize, u64, Float)> = None;
            for (ci, channel) in self.channels.iter().enumerate() {
                for (vi, voice) in channel.voices().iter().enumerate() {
                    let key = (voice.start_time_samples(), voice.current_attenuation_db());
                    let replace = match &oldest {
                        None => true,
                        Some((_, _, t, db)) => key.0 < *t || (key.0 == *t && key.1 > *db),
                    };
                    if replace {
                        oldest = Some((ci, vi, key.0, key.1));
                    }
                }
            }
            match oldest {
                Some((ci, vi, ..)) => {
                    self.channels[ci].remove_voice(vi);
                    excess -= 1;
                }
                None => break,
            }
        }
    }

    /// Renders one audio block. The only method the real-time audio
    /// thread calls; drains the control queue first, then every
    /// channel's voices are mixed into dry/reverb/chorus buses, the
    /// aux buses are processed, and everything is summed into
    /// `out_left`/`out_right` (§4.6).
    pub fn render_block(&mut self, out_left: &mut [f32], out_right: &mut [f32]) {
        let len = out_left.len().min(out_right.len());
        self.process_control_queue();
        self.ensure_scratch_len(len);

        for buf in [&mut self.dry_l, &mut self.dry_r, &mut self.reverb_send, &mut self.chorus_send] {
            buf[..len].iter_mut().for_each(|s| *s = 0.0);
        }

        for channel in &mut self.channels {
            channel.render_block(
                len,
                &mut self.dry_l[..len],
                &mut self.dry_r[..len],
                &mut self.reverb_send[..len],
                &mut self.chorus_send[..len],
            );
        }

        if self.config.reverb_enabled {
            self.reverb
                .process(&self.reverb_send[..len], &mut self.reverb_wet_l[..len], &mut self.reverb_wet_r[..len]);
        } else {
            self.reverb_wet_l[..len].iter_mut().for_each(|s| *s = 0.0);
            self.reverb_wet_r[..len].iter_mut().for_each(|s| *s = 0.0);
        }

        if self.config.chorus_enabled {
            self.chorus.process(
                &self.chorus_send[..len],
                &self.chorus_send[..len],
                &mut self.chorus_wet_l[..len],
                &mut self.chorus_wet_r[..len],
            );
        } else {
            self.chorus_wet_l[..len].iter_mut().for_each(|s| *s = 0.0);
            self.chorus_wet_r[..len].iter_mut().for_each(|s| *s = 0.0);
        }

        for i in 0..len {
            out_left[i] = (self.dry_l[i] + self.reverb_wet_l[i] + self.chorus_wet_l[i]) as f32;
            out_right[i] = (self.dry_r[i] + self.reverb_wet_r[i] + self.chorus_wet_r[i]) as f32;
        }

        self.samples_rendered += len as u64;
    }

    fn ensure_scratch_len(&mut self, len: usize) {
        for buf in [
            &mut self.dry_l,
            &mut self.dry_r,
            &mut self.reverb_send,
            &mut self.chorus_send,
            &mut self.reverb_wet_l,
            &mut self.reverb_wet_r,
            &mut self.chorus_wet_l,
            &mut self.chorus_wet_r,
        ] {
            if buf.len() < len {
                buf.resize(len, 0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soundfont::testutil::SineBank;

    fn synth_with_sine(sample_rate: u32) -> (Synth, ControlSender, EventReceiver) {
        let config = SynthConfig {
            sample_rate,
            initial_channel_count: 2,
            ..SynthConfig::default()
        };
        let (mut synth, tx, rx) = Synth::new(config);
        let bank: SharedSoundFont = Arc::new(SineBank::new(69, 440.0, sample_rate));
        synth.set_soundfont(bank).unwrap();
        (synth, tx, rx)
    }

    #[test]
    fn note_on_produces_nonzero_audio_within_the_block() {
        let (mut synth, _tx, _rx) = synth_with_sine(48_000);
        synth.dispatch(0, MidiMessage::NoteOn { channel: 0, key: 69, velocity: 127 });

        let mut left = vec![0.0f32; 1024];
        let mut right = vec![0.0f32; 1024];
        for _ in 0..20 {
            synth.render_block(&mut left, &mut right);
        }
        assert!(left.iter().any(|s| s.abs() > 1e-4));
    }

    #[test]
    fn note_off_eventually_silences_the_voice() {
        let (mut synth, _tx, _rx) = synth_with_sine(48_000);
        synth.dispatch(0, MidiMessage::NoteOn { channel: 0, key: 60, velocity: 100 });

        let mut left = vec![0.0f32; 512];
        let mut right = vec![0.0f32; 512];
        for _ in 0..4 {
            synth.render_block(&mut left, &mut right);
        }
        synth.dispatch(0, MidiMessage::NoteOff { channel: 0, key: 60, velocity: 0 });
        for _ in 0..400 {
            synth.render_block(&mut left, &mut right);
        }
        assert_eq!(synth.channels[0].voice_count(), 0);
    }

    #[test]
    fn control_queue_drains_before_rendering() {
        let (mut synth, mut tx, _rx) = synth_with_sine(48_000);
        tx.send(ControlMessage::Midi {
            channel: 0,
            message: MidiMessage::NoteOn { channel: 0, key: 69, velocity: 127 },
        });

        let mut left = vec![0.0f32; 256];
        let mut right = vec![0.0f32; 256];
        synth.render_block(&mut left, &mut right);
        assert_eq!(synth.channels[0].voice_count(), 1);
    }

    #[test]
    fn system_reset_clears_all_voices() {
        let (mut synth, _tx, _rx) = synth_with_sine(48_000);
        synth.dispatch(0, MidiMessage::NoteOn { channel: 0, key: 60, velocity: 100 });
        synth.dispatch(0, MidiMessage::SystemReset);
        assert_eq!(synth.channels[0].voice_count(), 0);
    }

    #[test]
    fn gm_system_on_sysex_resets_channels() {
        let (mut synth, _tx, _rx) = synth_with_sine(48_000);
        synth.dispatch(0, MidiMessage::NoteOn { channel: 0, key: 60, velocity: 100 });
        synth.dispatch(0, MidiMessage::SystemExclusive(vec![0x7E, 0x7F, 0x09, 0x01]));
        assert_eq!(synth.channels[0].voice_count(), 0);
    }

    #[test]
    fn gs_rhythm_sysex_sets_the_addressed_channel_to_drums() {
        let (mut synth, _tx, mut rx) = synth_with_sine(48_000);
        // F0 41 10 42 12 40 1n 15 vv F7, n=channel 3, vv=1 (rhythm on).
        synth.dispatch(0, MidiMessage::SystemExclusive(vec![0x41, 0x10, 0x42, 0x12, 0x40, 0x13, 0x15, 0x01]));
        let event = rx.try_recv().expect("drum-change event expected");
        assert_eq!(event, EngineEvent::DrumChange { channel: 3, percussion: true });
    }

    #[test]
    fn gs_rhythm_sysex_can_clear_the_drum_flag() {
        let (mut synth, _tx, mut rx) = synth_with_sine(48_000);
        synth.dispatch(0, MidiMessage::SystemExclusive(vec![0x41, 0x10, 0x42, 0x12, 0x40, 0x19, 0x15, 0x00]));
        let event = rx.try_recv().expect("drum-change event expected");
        assert_eq!(event, EngineEvent::DrumChange { channel: 9, percussion: false });
    }

    #[test]
    fn xg_part_mode_sysex_sets_the_addressed_channel_to_drums() {
        let (mut synth, _tx, mut rx) = synth_with_sine(48_000);
        // F0 43 10 4C 08 cc 07 mm F7, cc=channel 9, mm=0x7F (drums).
        synth.dispatch(0, MidiMessage::SystemExclusive(vec![0x43, 0x10, 0x4C, 0x08, 0x09, 0x07, 0x7F]));
        let event = rx.try_recv().expect("drum-change event expected");
        assert_eq!(event, EngineEvent::DrumChange { channel: 9, percussion: true });
    }

    #[test]
    fn voice_cap_evicts_oldest_voice_first() {
        let config = SynthConfig {
            sample_rate: 48_000,
            voice_cap: 1,
            initial_channel_count: 1,
            ..SynthConfig::default()
        };
        let (mut synth, _tx, _rx) = Synth::new(config);
        let bank: SharedSoundFont = Arc::new(SineBank::new(69, 440.0, 48_000));
        synth.set_soundfont(bank).unwrap();

        synth.dispatch(0, MidiMessage::NoteOn { channel: 0, key: 60, velocity: 100 });
        synth.dispatch(0, MidiMessage::NoteOn { channel: 0, key: 64, velocity: 100 });
        assert_eq!(synth.channels[0].voice_count(), 1);
        assert_eq!(synth.channels[0].voices()[0].key(), 64);
    }

    #[test]
    fn add_channel_respects_the_cap() {
        let config = SynthConfig {
            initial_channel_count: MAX_CHANNELS,
            ..SynthConfig::default()
        };
        let (mut synth, _tx, _rx) = Synth::new(config);
        assert_eq!(synth.add_channel(), None);
    }
}
