//! The typed event bus (§6 "Event bus") and the audio-thread failure
//! counters that stand in for returned `Result`s on the real-time path
//! (§4.11).

use std::sync::atomic::{AtomicU64, Ordering};

/// Published by the synth core to subscribers on the control thread.
/// Subscribers must not call back into the synth synchronously from
/// their handler (§6).
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8 },
    ControllerChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    PitchWheel { channel: u8, value: i16 },
    DrumChange { channel: u8, percussion: bool },
    StopAll,
    NewChannel { channel: u8 },
    MuteChannel { channel: u8, muted: bool },
    PresetListChange,
    SoundfontError(String),
}

/// Monotonic counters for the informational failure kinds of §7
/// (`VoiceLimitExceeded`, `QueueOverflow`) plus the per-voice/per-
/// message failures of §4.8, read by the control thread for
/// diagnostics. Never reset implicitly.
#[derive(Debug, Default)]
pub struct FailureCounters {
    pub voice_limit_exceeded: AtomicU64,
    pub queue_overflow: AtomicU64,
    pub missing_sample: AtomicU64,
    pub invalid_midi_event: AtomicU64,
    pub malformed_zone: AtomicU64,
}

impl FailureCounters {
    pub fn new() -> FailureCounters {
        FailureCounters::default()
    }

    pub fn record_voice_limit_exceeded(&self) {
        self.voice_limit_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_overflow(&self) {
        self.queue_overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missing_sample(&self) {
        self.missing_sample.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_midi_event(&self) {
        self.invalid_midi_event.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_zone(&self) {
        self.malformed_zone.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FailureSnapshot {
        FailureSnapshot {
            voice_limit_exceeded: self.voice_limit_exceeded.load(Ordering::Relaxed),
            queue_overflow: self.queue_overflow.load(Ordering::Relaxed),
            missing_sample: self.missing_sample.load(Ordering::Relaxed),
            invalid_midi_event: self.invalid_midi_event.load(Ordering::Relaxed),
            malformed_zone: self.malformed_zone.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time read of [`FailureCounters`], cheap to pass around
/// for logging or a diagnostics UI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FailureSnapshot {
    pub voice_limit_exceeded: u64,
    pub queue_overflow: u64,
    pub missing_sample: u64,
    pub invalid_midi_event: u64,
    pub malformed_zone: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let counters = FailureCounters::new();
        assert_eq!(counters.snapshot(), FailureSnapshot::default());
    }

    #[test]
    fn recording_increments_the_right_counter_only() {
        let counters = FailureCounters::new();
        counters.record_voice_limit_exceeded();
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.voice_limit_exceeded, 1);
        assert_eq!(snapshot.queue_overflow, 0);
    }
}
