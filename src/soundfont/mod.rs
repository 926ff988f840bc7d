pub mod generator;
pub mod modulator;
pub mod sample;
pub mod zone;

#[cfg(test)]
pub mod testutil;

pub use generator::{GeneratorAmounts, GeneratorType, NUM_GENERATORS};
pub use modulator::{
    default_modulators, Modulator, ModulatorDestination, ModulatorInput, ModulatorInputs, ModulatorSource, SourceCurve,
};
pub use sample::{Sample, SampleType};
pub use zone::{Instrument, InstrumentZone, LoopMode, Preset, PresetZone, ResolvedZone, SoundFontBank};
