//! Presets, instruments and zones: the key/velocity-ranged containers
//! of generator and modulator overrides that a voice is built from.
//!
//! The object model here is the *contract* the (out-of-scope) SF2
//! parser must hand the engine; this module never reads a `.sf2` file
//! itself.

use super::generator::{GeneratorAmounts, GeneratorType};
use super::modulator::Modulator;
use super::sample::Sample;

pub type SampleId = usize;
pub type InstrumentId = usize;

/// A key/velocity-ranged set of generator and modulator overrides
/// inside an instrument, pointing at one sample.
#[derive(Clone, Debug)]
pub struct InstrumentZone {
    pub key_range: (u8, u8),
    pub vel_range: (u8, u8),
    pub generators: GeneratorAmounts,
    pub modulators: Vec<Modulator>,
    pub sample: SampleId,
}

impl InstrumentZone {
    pub fn matches(&self, key: u8, velocity: u8) -> bool {
        (self.key_range.0..=self.key_range.1).contains(&key)
            && (self.vel_range.0..=self.vel_range.1).contains(&velocity)
    }
}

#[derive(Clone, Debug)]
pub struct Instrument {
    pub name: String,
    pub zones: Vec<InstrumentZone>,
}

impl Instrument {
    pub fn zones_for(&self, key: u8, velocity: u8) -> impl Iterator<Item = &InstrumentZone> {
        self.zones.iter().filter(move |z| z.matches(key, velocity))
    }
}

/// A key/velocity-ranged set of generator/modulator overrides at the
/// preset level, pointing at one instrument. Preset generators *add*
/// to the instrument generators they layer over (§SF2 9.4).
#[derive(Clone, Debug)]
pub struct PresetZone {
    pub key_range: (u8, u8),
    pub vel_range: (u8, u8),
    pub generators: GeneratorAmounts,
    pub modulators: Vec<Modulator>,
    pub instrument: InstrumentId,
}

impl PresetZone {
    pub fn matches(&self, key: u8, velocity: u8) -> bool {
        (self.key_range.0..=self.key_range.1).contains(&key)
            && (self.vel_range.0..=self.vel_range.1).contains(&velocity)
    }
}

#[derive(Clone, Debug)]
pub struct Preset {
    pub name: String,
    pub bank: u16,
    pub program: u8,
    pub zones: Vec<PresetZone>,
}

impl Preset {
    pub fn zones_for(&self, key: u8, velocity: u8) -> impl Iterator<Item = &PresetZone> {
        self.zones.iter().filter(move |z| z.matches(key, velocity))
    }
}

/// A fully resolved generator/modulator layer for a single voice,
/// produced by combining a matching preset zone with a matching
/// instrument zone.
#[derive(Clone, Debug)]
pub struct ResolvedZone {
    pub generators: GeneratorAmounts,
    pub modulators: Vec<Modulator>,
    pub sample: SampleId,
}

/// The read-only contract the engine needs from a loaded SoundFont
/// bank. A concrete implementation (backed by a parsed `.sf2` file) is
/// supplied by the host application; this crate never parses the file
/// format itself.
pub trait SoundFontBank {
    fn preset(&self, bank: u16, program: u8) -> Option<&Preset>;
    fn instrument(&self, id: InstrumentId) -> &Instrument;
    fn sample(&self, id: SampleId) -> &Sample;

    /// Resolves every `(preset zone, instrument zone)` pair matching
    /// `(key, velocity)` for the given preset, with preset generators
    /// layered additively over instrument generators and preset
    /// modulators appended after instrument modulators, per §3's
    /// "preset zones add, instrument zones override" rule — "override"
    /// here means the instrument zone supplies the base, which the
    /// preset zone's offsets are layered on top of.
    fn resolve_zones(&self, preset: &Preset, key: u8, velocity: u8) -> Vec<ResolvedZone> {
        let mut out = Vec::new();
        for preset_zone in preset.zones_for(key, velocity) {
            let instrument = self.instrument(preset_zone.instrument);
            for inst_zone in instrument.zones_for(key, velocity) {
                let mut generators = inst_zone.generators;
                generators.add_preset_layer(&preset_zone.generators);
                let mut modulators = inst_zone.modulators.clone();
                modulators.extend(preset_zone.modulators.iter().cloned());
                out.push(ResolvedZone {
                    generators,
                    modulators,
                    sample: inst_zone.sample,
                });
            }
        }
        out
    }
}

/// Reads the sample-mode bits of `sampleModes` (generator 54):
/// `0` = no loop, `1` = loop continuously, `3` = loop until release
/// then play the remainder. `2` is unused/reserved and treated as
/// no-loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopMode {
    NoLoop,
    Continuous,
    LoopUntilRelease,
}

impl LoopMode {
    pub fn from_generator(generators: &GeneratorAmounts) -> LoopMode {
        match generators.get(GeneratorType::SampleModes) {
            1 => LoopMode::Continuous,
            3 => LoopMode::LoopUntilRelease,
            _ => LoopMode::NoLoop,
        }
    }
}
