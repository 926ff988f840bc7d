use thiserror::Error;

/// Errors that can be reported back to a caller on the control thread.
///
/// Per-voice and per-message failures on the audio thread never surface
/// through this type — they are logged and counted (see [`crate::event::FailureCounters`])
/// so that a malformed zone or a corrupt MIDI byte never aborts playback.
#[derive(Error, Debug)]
pub enum SynthError {
    #[error("invalid soundfont: {0}")]
    InvalidSoundFont(String),

    #[error("missing sample {0}")]
    MissingSample(String),

    #[error("invalid midi event: {0}")]
    InvalidMidiEvent(String),
}

/// Errors specific to sequencer-level operations (loading a tune, seeking).
#[derive(Error, Debug)]
pub enum SequencerError {
    #[error("no midi file loaded")]
    NoTuneLoaded,

    #[error("invalid tempo map: {0}")]
    InvalidTempoMap(String),

    #[error("seek target {0} ticks is beyond the end of the tune")]
    SeekOutOfRange(u64),
}
