//! A minimal synthetic SoundFont bank used only by this crate's own
//! tests. It stands in for the (out-of-scope) `.sf2` parser so the
//! voice/channel/synth tests can exercise real generator/modulator
//! plumbing without a real bank file.

use std::sync::Arc;

use super::generator::{GeneratorAmounts, GeneratorType};
use super::sample::{Sample, SampleType};
use super::zone::{Instrument, InstrumentZone, Preset, PresetZone, SoundFontBank};

/// A single-preset, single-instrument, single-sample bank containing
/// one cycle-accurate sine wave at the given frequency, rendered at
/// `sample_rate` and tagged with `root_key` as its original pitch.
pub struct SineBank {
    preset: Preset,
    instrument: Instrument,
    sample: Sample,
}

impl SineBank {
    pub fn new(root_key: u8, frequency: f64, sample_rate: u32) -> SineBank {
        let num_samples = sample_rate as usize * 2; // two seconds, looped
        let mut pcm = Vec::with_capacity(num_samples);
        for i in 0..num_samples {
            let phase = 2.0 * std::f64::consts::PI * frequency * (i as f64) / sample_rate as f64;
            pcm.push((phase.sin() * i16::MAX as f64) as i16);
        }
        let sample = Sample {
            pcm: Arc::from(pcm.into_boxed_slice()),
            sample_rate,
            loop_start: 0,
            loop_end: num_samples as u32,
            original_pitch: root_key,
            pitch_correction: 0,
            linked_sample_index: None,
            sample_type: SampleType::Mono,
        };

        let mut generators = GeneratorAmounts::defaults();
        generators.set(GeneratorType::SampleModes, 1); // loop continuously
        generators.set(GeneratorType::OverridingRootKey, root_key as i16);
        // A release long enough to observe but short enough for tests.
        generators.set(GeneratorType::ReleaseVolEnv, -1200);

        let instrument_zone = InstrumentZone {
            key_range: (0, 127),
            vel_range: (0, 127),
            generators,
            modulators: Vec::new(),
            sample: 0,
        };
        let instrument = Instrument {
            name: "test sine".to_string(),
            zones: vec![instrument_zone],
        };

        let preset_zone = PresetZone {
            key_range: (0, 127),
            vel_range: (0, 127),
            generators: GeneratorAmounts::zero(),
            modulators: Vec::new(),
            instrument: 0,
        };
        let preset = Preset {
            name: "test preset".to_string(),
            bank: 0,
            program: 0,
            zones: vec![preset_zone],
        };

        SineBank {
            preset,
            instrument,
            sample,
        }
    }
}

impl SoundFontBank for SineBank {
    fn preset(&self, bank: u16, program: u8) -> Option<&Preset> {
        if bank == self.preset.bank && program == self.preset.program {
            Some(&self.preset)
        } else {
            None
        }
    }

    fn instrument(&self, id: usize) -> &Instrument {
        assert_eq!(id, 0);
        &self.instrument
    }

    fn sample(&self, id: usize) -> &Sample {
        assert_eq!(id, 0);
        &self.sample
    }
}
