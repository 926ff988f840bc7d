//! SoundFont 2 sample playback engine: loads a bank's presets and
//! samples, synthesizes voices from generators and modulators, and
//! drives them from a MIDI channel state machine or a sequencer
//! reading a standard MIDI file.
//!
//! The audio-rendering path (`Synth::render_block` and everything it
//! calls) never allocates, blocks or panics on malformed input; it logs
//! and counts failures instead (see [`event::FailureCounters`]).

/// The floating-point type used throughout the engine. `f64` for
/// headroom in envelope and filter coefficient math; audio samples are
/// narrowed to `f32` only at the very edge, when handed to the output
/// device.
pub type Float = f64;

pub mod channel;
pub mod chorus;
pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod filter;
pub mod lfo;
pub mod midi;
pub mod mod_envelope;
pub mod queue;
pub mod reverb;
pub mod sequencer;
pub mod soundfont;
pub mod synth;
pub mod units;
pub mod voice;

pub use channel::Channel;
pub use config::{ChorusConfig, SequencerConfig, SynthConfig};
pub use error::{SequencerError, SynthError};
pub use event::{EngineEvent, FailureCounters, FailureSnapshot};
pub use queue::{control_queue, event_queue, ControlMessage, ControlReceiver, ControlSender, EventReceiver, EventSender};
pub use sequencer::{Sequencer, SequencedEvent, SequencerTarget, SequencerTrack, TempoChange};
pub use synth::Synth;
