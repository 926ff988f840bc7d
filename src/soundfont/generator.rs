//! The SoundFont 2.04 generator enumeration (section 8.1.2 of the
//! spec) and the fixed-length generator vector a voice carries three
//! copies of: base, modulated, and (elsewhere) the converted-to-
//! physical-units cache.

use serde::{Deserialize, Serialize};

/// Number of defined generator slots, `0..=58` plus the reserved
/// terminator at `59`.
pub const NUM_GENERATORS: usize = 60;

/// SF2 generator ids, in SoundFont-spec order. Unused/reserved slots
/// are kept so that `as usize` matches the file format exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GeneratorType {
    StartAddrsOffset = 0,
    EndAddrsOffset = 1,
    StartloopAddrsOffset = 2,
    EndloopAddrsOffset = 3,
    StartAddrsCoarseOffset = 4,
    ModLfoToPitch = 5,
    VibLfoToPitch = 6,
    ModEnvToPitch = 7,
    InitialFilterFc = 8,
    InitialFilterQ = 9,
    ModLfoToFilterFc = 10,
    ModEnvToFilterFc = 11,
    EndAddrsCoarseOffset = 12,
    ModLfoToVolume = 13,
    Unused1 = 14,
    ChorusEffectsSend = 15,
    ReverbEffectsSend = 16,
    Pan = 17,
    Unused2 = 18,
    Unused3 = 19,
    Unused4 = 20,
    DelayModLfo = 21,
    FreqModLfo = 22,
    DelayVibLfo = 23,
    FreqVibLfo = 24,
    DelayModEnv = 25,
    AttackModEnv = 26,
    HoldModEnv = 27,
    DecayModEnv = 28,
    SustainModEnv = 29,
    ReleaseModEnv = 30,
    KeynumToModEnvHold = 31,
    KeynumToModEnvDecay = 32,
    DelayVolEnv = 33,
    AttackVolEnv = 34,
    HoldVolEnv = 35,
    DecayVolEnv = 36,
    SustainVolEnv = 37,
    ReleaseVolEnv = 38,
    KeynumToVolEnvHold = 39,
    KeynumToVolEnvDecay = 40,
    Instrument = 41,
    Reserved1 = 42,
    KeyRange = 43,
    VelRange = 44,
    StartloopAddrsCoarseOffset = 45,
    Keynum = 46,
    Velocity = 47,
    InitialAttenuation = 48,
    Reserved2 = 49,
    EndloopAddrsCoarseOffset = 50,
    CoarseTune = 51,
    FineTune = 52,
    SampleId = 53,
    SampleModes = 54,
    Reserved3 = 55,
    ScaleTuning = 56,
    ExclusiveClass = 57,
    OverridingRootKey = 58,
    Unused5 = 59,
}

impl GeneratorType {
    pub fn from_index(index: usize) -> Option<GeneratorType> {
        use GeneratorType::*;
        let gen = match index {
            0 => StartAddrsOffset,
            1 => EndAddrsOffset,
            2 => StartloopAddrsOffset,
            3 => EndloopAddrsOffset,
            4 => StartAddrsCoarseOffset,
            5 => ModLfoToPitch,
            6 => VibLfoToPitch,
            7 => ModEnvToPitch,
            8 => InitialFilterFc,
            9 => InitialFilterQ,
            10 => ModLfoToFilterFc,
            11 => ModEnvToFilterFc,
            12 => EndAddrsCoarseOffset,
            13 => ModLfoToVolume,
            14 => Unused1,
            15 => ChorusEffectsSend,
            16 => ReverbEffectsSend,
            17 => Pan,
            18 => Unused2,
            19 => Unused3,
            20 => Unused4,
            21 => DelayModLfo,
            22 => FreqModLfo,
            23 => DelayVibLfo,
            24 => FreqVibLfo,
            25 => DelayModEnv,
            26 => AttackModEnv,
            27 => HoldModEnv,
            28 => DecayModEnv,
            29 => SustainModEnv,
            30 => ReleaseModEnv,
            31 => KeynumToModEnvHold,
            32 => KeynumToModEnvDecay,
            33 => DelayVolEnv,
            34 => AttackVolEnv,
            35 => HoldVolEnv,
            36 => DecayVolEnv,
            37 => SustainVolEnv,
            38 => ReleaseVolEnv,
            39 => KeynumToVolEnvHold,
            40 => KeynumToVolEnvDecay,
            41 => Instrument,
            42 => Reserved1,
            43 => KeyRange,
            44 => VelRange,
            45 => StartloopAddrsCoarseOffset,
            46 => Keynum,
            47 => Velocity,
            48 => InitialAttenuation,
            49 => Reserved2,
            50 => EndloopAddrsCoarseOffset,
            51 => CoarseTune,
            52 => FineTune,
            53 => SampleId,
            54 => SampleModes,
            55 => Reserved3,
            56 => ScaleTuning,
            57 => ExclusiveClass,
            58 => OverridingRootKey,
            59 => Unused5,
            _ => return None,
        };
        Some(gen)
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A dense `generator id -> signed amount` vector, as SF2 zones store
/// them. Default-constructs to all zeros; actual SF2 defaults (e.g.
/// `scaleTuning = 100`) are applied by [`GeneratorAmounts::defaults`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeneratorAmounts {
    values: [i16; NUM_GENERATORS],
}

impl GeneratorAmounts {
    pub fn zero() -> Self {
        GeneratorAmounts {
            values: [0; NUM_GENERATORS],
        }
    }

    /// The SF2-mandated non-zero defaults (SoundFont 2.04 Appendix):
    /// `scaleTuning=100` (100 cents/key), `initialFilterFc=13500`
    /// (~20 kHz, effectively unfiltered), `overridingRootKey=-1`
    /// ("use the sample's own `originalPitch`"). Every other generator
    /// defaults to 0.
    pub fn defaults() -> Self {
        let mut g = GeneratorAmounts::zero();
        g.set(GeneratorType::ScaleTuning, 100);
        g.set(GeneratorType::InitialFilterFc, 13500);
        g.set(GeneratorType::OverridingRootKey, -1);
        g
    }

    pub fn get(&self, gen: GeneratorType) -> i16 {
        self.values[gen.index()]
    }

    pub fn set(&mut self, gen: GeneratorType, value: i16) {
        self.values[gen.index()] = value;
    }

    /// Adds `preset` zone overrides onto this (instrument-level)
    /// vector, per the SF2 rule that preset generators *add* to
    /// instrument generators rather than overriding them.
    pub fn add_preset_layer(&mut self, preset: &GeneratorAmounts) {
        for i in 0..NUM_GENERATORS {
            // A handful of generators are index/range generators that
            // must never be summed (they select a sample or range,
            // they don't offset one).
            if matches!(
                GeneratorType::from_index(i),
                Some(GeneratorType::Instrument)
                    | Some(GeneratorType::SampleId)
                    | Some(GeneratorType::KeyRange)
                    | Some(GeneratorType::VelRange)
                    | Some(GeneratorType::SampleModes)
                    | Some(GeneratorType::ExclusiveClass)
            ) {
                continue;
            }
            self.values[i] = self.values[i].saturating_add(preset.values[i]);
        }
    }
}

impl Default for GeneratorAmounts {
    fn default() -> Self {
        GeneratorAmounts::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_roundtrip() {
        for i in 0..NUM_GENERATORS {
            let g = GeneratorType::from_index(i).unwrap();
            assert_eq!(g.index(), i);
        }
    }

    #[test]
    fn out_of_range_index_is_none() {
        assert!(GeneratorType::from_index(NUM_GENERATORS).is_none());
    }

    #[test]
    fn preset_layer_adds_not_overrides() {
        let mut inst = GeneratorAmounts::zero();
        inst.set(GeneratorType::InitialAttenuation, 50);
        let mut preset = GeneratorAmounts::zero();
        preset.set(GeneratorType::InitialAttenuation, 30);
        inst.add_preset_layer(&preset);
        assert_eq!(inst.get(GeneratorType::InitialAttenuation), 80);
    }

    #[test]
    fn index_generators_are_not_summed() {
        let mut inst = GeneratorAmounts::zero();
        inst.set(GeneratorType::SampleId, 3);
        let mut preset = GeneratorAmounts::zero();
        preset.set(GeneratorType::SampleId, 7);
        inst.add_preset_layer(&preset);
        assert_eq!(inst.get(GeneratorType::SampleId), 3);
    }
}
