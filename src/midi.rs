//! MIDI 1.0 byte-stream model (§6.1): the message enum the channel
//! state machine and sequencer both dispatch, and a running-status
//! aware parser that turns a byte stream (live or from an SMF track)
//! into a sequence of [`MidiMessage`].

use log::{trace, warn};

/// One decoded MIDI message. Channel numbers are `0..16`; values are
/// already masked to their data-byte range (`0..128`) except
/// [`MidiMessage::PitchBend`], which is the full signed 14-bit range
/// `-8192..=8191`.
#[derive(Clone, Debug, PartialEq)]
pub enum MidiMessage {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    PolyPressure { channel: u8, key: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    PitchBend { channel: u8, value: i16 },
    SystemExclusive(Vec<u8>),
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    SystemReset,
    SongPosition(u16),
}

impl MidiMessage {
    /// The channel this message targets, if it is a Channel Voice or
    /// Channel Mode message.
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// `true` for messages the sequencer's seek silently replays
    /// without sounding anything: everything except note-on/note-off.
    pub fn is_silent_on_replay(&self) -> bool {
        !matches!(self, MidiMessage::NoteOn { .. } | MidiMessage::NoteOff { .. })
    }

    /// Encodes back to raw MIDI 1.0 bytes, used by the sequencer's
    /// passthrough mode (§4.7) to drive an external sink instead of
    /// the in-process synth. Always emits a fresh status byte; running
    /// status is an on-the-wire compression this crate never produces.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff { channel, key, velocity } => {
                vec![NOTE_OFF | (channel & 0x0F), key & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, key, velocity } => {
                vec![NOTE_ON | (channel & 0x0F), key & 0x7F, velocity & 0x7F]
            }
            MidiMessage::PolyPressure { channel, key, pressure } => {
                vec![POLY_PRESSURE | (channel & 0x0F), key & 0x7F, pressure & 0x7F]
            }
            MidiMessage::ControlChange { channel, controller, value } => {
                vec![CONTROL_CHANGE | (channel & 0x0F), controller & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![PROGRAM_CHANGE | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                vec![CHANNEL_PRESSURE | (channel & 0x0F), pressure & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let raw = (value as i32 + 8192) as u16;
                vec![PITCH_BEND | (channel & 0x0F), (raw & 0x7F) as u8, ((raw >> 7) & 0x7F) as u8]
            }
            MidiMessage::SystemExclusive(ref data) => {
                let mut bytes = Vec::with_capacity(data.len() + 2);
                bytes.push(SYSEX_START);
                bytes.extend_from_slice(data);
                bytes.push(SYSEX_END);
                bytes
            }
            MidiMessage::TimingClock => vec![TIMING_CLOCK],
            MidiMessage::Start => vec![START],
            MidiMessage::Continue => vec![CONTINUE],
            MidiMessage::Stop => vec![STOP],
            MidiMessage::ActiveSensing => vec![ACTIVE_SENSING],
            MidiMessage::SystemReset => vec![SYSTEM_RESET],
            MidiMessage::SongPosition(pos) => vec![SONG_POSITION, (pos & 0x7F) as u8, ((pos >> 7) & 0x7F) as u8],
        }
    }
}

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const POLY_PRESSURE: u8 = 0xA0;
const CONTROL_CHANGE: u8 = 0xB0;
const PROGRAM_CHANGE: u8 = 0xC0;
const CHANNEL_PRESSURE: u8 = 0xD0;
const PITCH_BEND: u8 = 0xE0;
const SYSEX_START: u8 = 0xF0;
const SONG_POSITION: u8 = 0xF2;
const SYSEX_END: u8 = 0xF7;
const TIMING_CLOCK: u8 = 0xF8;
const START: u8 = 0xFA;
const CONTINUE: u8 = 0xFB;
const STOP: u8 = 0xFC;
const ACTIVE_SENSING: u8 = 0xFE;
const SYSTEM_RESET: u8 = 0xFF;

/// Decodes a stream of raw MIDI bytes into [`MidiMessage`]s, carrying
/// the running-status byte and any in-progress SysEx buffer across
/// calls to `feed`, exactly as MIDI 1.0 requires.
#[derive(Debug, Default)]
pub struct MidiStreamParser {
    running_status: Option<u8>,
    pending: Vec<u8>,
    expected_len: usize,
    sysex_buffer: Option<Vec<u8>>,
}

impl MidiStreamParser {
    pub fn new() -> MidiStreamParser {
        MidiStreamParser::default()
    }

    /// Feeds one byte into the parser. Returns `Some(message)` once a
    /// complete message has been assembled; malformed bytes are logged
    /// and dropped (§4.8 failure semantics), never panicking the
    /// caller.
    pub fn feed(&mut self, byte: u8) -> Option<MidiMessage> {
        if let Some(buffer) = &mut self.sysex_buffer {
            if byte == SYSEX_END {
                let bytes = self.sysex_buffer.take().unwrap();
                trace!("sysex complete, {} bytes", bytes.len());
                return Some(MidiMessage::SystemExclusive(bytes));
            }
            buffer.push(byte);
            return None;
        }

        if byte >= 0xF8 {
            // System Real-Time: single byte, never touches running status
            // or an in-progress message.
            return real_time_message(byte);
        }

        if byte == SYSEX_START {
            self.sysex_buffer = Some(Vec::new());
            self.pending.clear();
            return None;
        }

        if byte & 0x80 != 0 {
            // Status byte: starts a new message, all of which require
            // at least one data byte in this crate's message set.
            self.running_status = Some(byte);
            self.pending.clear();
            self.expected_len = if byte == SONG_POSITION { 2 } else { data_byte_count(byte) };
            return None;
        }

        // Data byte under the current (possibly running) status.
        let status = match self.running_status {
            Some(s) => s,
            None => {
                warn!("midi data byte {:#04x} with no running status, dropped", byte);
                return None;
            }
        };
        self.pending.push(byte);
        if self.pending.len() < self.expected_len {
            return None;
        }

        self.assemble(status)
    }

    fn assemble(&mut self, status: u8) -> Option<MidiMessage> {
        let data = std::mem::take(&mut self.pending);
        let channel = status & 0x0F;
        let message = match status & 0xF0 {
            NOTE_OFF => MidiMessage::NoteOff {
                channel,
                key: data[0],
                velocity: data[1],
            },
            NOTE_ON if data[1] == 0 => MidiMessage::NoteOff {
                channel,
                key: data[0],
                velocity: 0,
            },
            NOTE_ON => MidiMessage::NoteOn {
                channel,
                key: data[0],
                velocity: data[1],
            },
            POLY_PRESSURE => MidiMessage::PolyPressure {
                channel,
                key: data[0],
                pressure: data[1],
            },
            CONTROL_CHANGE => MidiMessage::ControlChange {
                channel,
                controller: data[0],
                value: data[1],
            },
            PROGRAM_CHANGE => MidiMessage::ProgramChange {
                channel,
                program: data[0],
            },
            CHANNEL_PRESSURE => MidiMessage::ChannelPressure {
                channel,
                pressure: data[0],
            },
            PITCH_BEND => {
                let raw = (data[0] as u16) | ((data[1] as u16) << 7);
                MidiMessage::PitchBend {
                    channel,
                    value: raw as i16 - 8192,
                }
            }
            _ if status == SONG_POSITION => MidiMessage::SongPosition((data[0] as u16) | ((data[1] as u16) << 7)),
            _ => {
                warn!("unrecognized midi status byte {:#04x}, dropped", status);
                return None;
            }
        };
        Some(message)
    }
}

fn real_time_message(byte: u8) -> Option<MidiMessage> {
    match byte {
        TIMING_CLOCK => Some(MidiMessage::TimingClock),
        START => Some(MidiMessage::Start),
        CONTINUE => Some(MidiMessage::Continue),
        STOP => Some(MidiMessage::Stop),
        ACTIVE_SENSING => Some(MidiMessage::ActiveSensing),
        SYSTEM_RESET => Some(MidiMessage::SystemReset),
        _ => {
            warn!("unrecognized system real-time byte {:#04x}, dropped", byte);
            None
        }
    }
}

fn data_byte_count(status: u8) -> usize {
    match status & 0xF0 {
        PROGRAM_CHANGE | CHANNEL_PRESSURE => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut MidiStreamParser, bytes: &[u8]) -> Vec<MidiMessage> {
        bytes.iter().filter_map(|&b| parser.feed(b)).collect()
    }

    #[test]
    fn decodes_note_on() {
        let mut parser = MidiStreamParser::new();
        let messages = feed_all(&mut parser, &[0x90, 69, 127]);
        assert_eq!(
            messages,
            vec![MidiMessage::NoteOn {
                channel: 0,
                key: 69,
                velocity: 127
            }]
        );
    }

    #[test]
    fn note_on_velocity_zero_is_note_off() {
        let mut parser = MidiStreamParser::new();
        let messages = feed_all(&mut parser, &[0x90, 60, 0]);
        assert_eq!(
            messages,
            vec![MidiMessage::NoteOff {
                channel: 0,
                key: 60,
                velocity: 0
            }]
        );
    }

    #[test]
    fn running_status_repeats_note_on() {
        let mut parser = MidiStreamParser::new();
        let messages = feed_all(&mut parser, &[0x90, 60, 100, 64, 90]);
        assert_eq!(
            messages,
            vec![
                MidiMessage::NoteOn {
                    channel: 0,
                    key: 60,
                    velocity: 100
                },
                MidiMessage::NoteOn {
                    channel: 0,
                    key: 64,
                    velocity: 90
                }
            ]
        );
    }

    #[test]
    fn pitch_bend_decodes_to_signed_range() {
        let mut parser = MidiStreamParser::new();
        let messages = feed_all(&mut parser, &[0xE0, 0x7F, 0x7F]);
        assert_eq!(messages, vec![MidiMessage::PitchBend { channel: 0, value: 8191 }]);
    }

    #[test]
    fn sysex_collects_until_terminator() {
        let mut parser = MidiStreamParser::new();
        let messages = feed_all(&mut parser, &[0xF0, 0x41, 0x10, 0x42, 0xF7]);
        assert_eq!(messages, vec![MidiMessage::SystemExclusive(vec![0x41, 0x10, 0x42])]);
    }

    #[test]
    fn real_time_bytes_do_not_disturb_running_status() {
        let mut parser = MidiStreamParser::new();
        let messages = feed_all(&mut parser, &[0x90, 60, 100, 0xF8, 64, 90]);
        assert_eq!(
            messages,
            vec![
                MidiMessage::NoteOn {
                    channel: 0,
                    key: 60,
                    velocity: 100
                },
                MidiMessage::TimingClock,
                MidiMessage::NoteOn {
                    channel: 0,
                    key: 64,
                    velocity: 90
                }
            ]
        );
    }

    #[test]
    fn dropped_data_byte_without_status_does_not_panic() {
        let mut parser = MidiStreamParser::new();
        let messages = feed_all(&mut parser, &[60, 100]);
        assert!(messages.is_empty());
    }

    #[test]
    fn to_bytes_round_trips_through_the_parser() {
        let originals = vec![
            MidiMessage::NoteOn { channel: 3, key: 60, velocity: 100 },
            MidiMessage::ControlChange { channel: 0, controller: 7, value: 80 },
            MidiMessage::PitchBend { channel: 1, value: -4000 },
            MidiMessage::ProgramChange { channel: 2, program: 12 },
        ];
        for original in originals {
            let mut parser = MidiStreamParser::new();
            let decoded = feed_all(&mut parser, &original.to_bytes());
            assert_eq!(decoded, vec![original]);
        }
    }

    #[test]
    fn sysex_round_trips() {
        let original = MidiMessage::SystemExclusive(vec![0x41, 0x10]);
        let mut parser = MidiStreamParser::new();
        let decoded = feed_all(&mut parser, &original.to_bytes());
        assert_eq!(decoded, vec![original]);
    }
}
