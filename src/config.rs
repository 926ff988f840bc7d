use serde::{Deserialize, Serialize};

use crate::Float;

/// Configuration for a [`crate::synth::Synth`] instance.
///
/// Mirrors the enumerated configuration in the system's external
/// interface contract: sample rate, voice cap, and the two auxiliary
/// send effects. Everything here is read once at construction time;
/// changing it afterwards means building a new `Synth`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct SynthConfig {
    pub sample_rate: u32,
    pub voice_cap: usize,
    pub reverb_enabled: bool,
    pub chorus_enabled: bool,
    pub chorus: ChorusConfig,
    pub initial_channel_count: usize,
    pub control_queue_capacity: usize,
    pub event_queue_capacity: usize,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            sample_rate: 44100,
            voice_cap: 250,
            reverb_enabled: true,
            chorus_enabled: true,
            chorus: ChorusConfig::default(),
            initial_channel_count: 16,
            control_queue_capacity: 1024,
            event_queue_capacity: 1024,
        }
    }
}

/// Parameters of the modulated-delay chorus bus.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct ChorusConfig {
    pub delay: Float,
    pub depth: Float,
    pub rate: Float,
    pub feedback: Float,
}

impl Default for ChorusConfig {
    fn default() -> Self {
        ChorusConfig {
            delay: 0.002,
            depth: 0.0019,
            rate: 0.4,
            feedback: 0.0,
        }
    }
}

/// Configuration for a [`crate::sequencer::Sequencer`] instance.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct SequencerConfig {
    pub default_tempo_bpm: Float,
    pub loop_count: u32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        SequencerConfig {
            default_tempo_bpm: 120.0,
            loop_count: 0,
        }
    }
}
