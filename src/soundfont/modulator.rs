//! SoundFont 2.04 modulators: the rules that map a MIDI/voice source
//! (or a pair of them) to an additive offset on a generator.

use serde::{Deserialize, Serialize};

use super::generator::GeneratorType;
use crate::Float;

/// A modulator source, either a general MIDI controller or one of the
/// SF2 "midi-like" sources (velocity, key, pitch wheel, ...).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ModulatorSource {
    NoController,
    NoteOnVelocity,
    NoteOnKeyNumber,
    PolyPressure,
    ChannelPressure,
    PitchWheel,
    PitchWheelSensitivity,
    Controller(u8),
    Link,
}

/// How a source's raw `0..127` (or `-8192..8191` for pitch wheel)
/// range is shaped before scaling.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SourceCurve {
    Linear,
    Concave,
    Convex,
    Switch,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModulatorInput {
    pub source: ModulatorSource,
    pub bipolar: bool,
    pub negative: bool,
    pub curve: SourceCurve,
}

impl ModulatorInput {
    pub const fn unipolar_positive(source: ModulatorSource, curve: SourceCurve) -> Self {
        ModulatorInput {
            source,
            bipolar: false,
            negative: false,
            curve,
        }
    }

    pub const fn unipolar_negative(source: ModulatorSource, curve: SourceCurve) -> Self {
        ModulatorInput {
            source,
            bipolar: false,
            negative: true,
            curve,
        }
    }

    pub const fn bipolar(source: ModulatorSource, curve: SourceCurve) -> Self {
        ModulatorInput {
            source,
            bipolar: true,
            negative: false,
            curve,
        }
    }

    /// Shapes a raw `0.0..=1.0` normalized source reading according to
    /// this input's polarity/curve, returning a value in `-1.0..=1.0`
    /// (unipolar inputs only ever produce `0.0..=1.0`).
    fn shape(&self, normalized: Float) -> Float {
        let x = normalized.clamp(0.0, 1.0);
        let shaped = match self.curve {
            SourceCurve::Linear => x,
            SourceCurve::Concave => {
                if x <= 0.0 {
                    0.0
                } else {
                    1.0 - (1.0 - x).powi(2)
                }
            }
            SourceCurve::Convex => x.powi(2),
            SourceCurve::Switch => {
                if x >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        };
        let value = if self.bipolar { 2.0 * shaped - 1.0 } else { shaped };
        if self.negative {
            -value
        } else {
            value
        }
    }
}

/// The readings a modulator can draw on, gathered once per control-
/// queue drain (or on note-on) rather than re-read per modulator.
#[derive(Clone, Copy, Debug, Default)]
pub struct ModulatorInputs {
    pub velocity: u8,
    pub key: u8,
    pub poly_pressure: u8,
    pub channel_pressure: u8,
    pub pitch_wheel: i16,
    pub pitch_wheel_sensitivity: u8,
    pub controllers: [u8; 128],
}

impl ModulatorInputs {
    fn normalized(&self, source: ModulatorSource) -> Float {
        match source {
            ModulatorSource::NoController => 1.0,
            ModulatorSource::NoteOnVelocity => self.velocity as Float / 127.0,
            ModulatorSource::NoteOnKeyNumber => self.key as Float / 127.0,
            ModulatorSource::PolyPressure => self.poly_pressure as Float / 127.0,
            ModulatorSource::ChannelPressure => self.channel_pressure as Float / 127.0,
            ModulatorSource::PitchWheel => (self.pitch_wheel as Float + 8192.0) / 16383.0,
            ModulatorSource::PitchWheelSensitivity => self.pitch_wheel_sensitivity as Float / 127.0,
            ModulatorSource::Controller(cc) => self.controllers[cc as usize & 0x7f] as Float / 127.0,
            // Chained modulators (source = output of another modulator) are
            // not produced by the default SF2 modulator set and are
            // treated as inert; a future extension can thread them through
            // a proper topological eval if a bank ever needs them.
            ModulatorSource::Link => 0.0,
        }
    }
}

/// Where a modulator's evaluated value is added. Nine of the ten SF2
/// default modulators land on a real generator; the tenth (MIDI pitch
/// wheel) has no generator of its own; it names a direct "initial
/// pitch" destination instead (SF2 2.04 §8.4.2, table 9, entry 10), so
/// it can't share `GeneratorType`'s index space without colliding with
/// an unrelated generator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum ModulatorDestination {
    Generator(GeneratorType),
    Pitch,
}

/// One SF2 modulator: `dest += transform(amount * primary(x1) * secondary(x2))`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Modulator {
    pub source: ModulatorInput,
    pub amount: Float,
    pub destination: ModulatorDestination,
    pub secondary_source: Option<ModulatorInput>,
}

impl Modulator {
    pub fn evaluate(&self, inputs: &ModulatorInputs) -> Float {
        let primary = self.source.shape(inputs.normalized(self.source.source));
        let secondary = match self.secondary_source {
            Some(src) => src.shape(inputs.normalized(src.source)),
            None => 1.0,
        };
        self.amount * primary * secondary
    }
}

/// The ten default modulators every SF2 preset implicitly carries
/// unless a zone overrides them (SoundFont 2.04 §8.4.2).
pub fn default_modulators() -> Vec<Modulator> {
    use GeneratorType::*;
    use ModulatorDestination::Generator;
    use ModulatorSource::*;
    use SourceCurve::*;

    vec![
        Modulator {
            source: ModulatorInput::unipolar_negative(NoteOnVelocity, Concave),
            amount: 960.0,
            destination: Generator(InitialAttenuation),
            secondary_source: None,
        },
        Modulator {
            source: ModulatorInput::unipolar_negative(NoteOnVelocity, Linear),
            amount: -2400.0,
            destination: Generator(InitialFilterFc),
            secondary_source: None,
        },
        Modulator {
            source: ModulatorInput::unipolar_positive(ChannelPressure, Linear),
            amount: 50.0,
            destination: Generator(VibLfoToPitch),
            secondary_source: None,
        },
        Modulator {
            source: ModulatorInput::unipolar_positive(Controller(1), Linear),
            amount: 50.0,
            destination: Generator(VibLfoToPitch),
            secondary_source: None,
        },
        Modulator {
            source: ModulatorInput::unipolar_negative(Controller(7), Concave),
            amount: 960.0,
            destination: Generator(InitialAttenuation),
            secondary_source: None,
        },
        Modulator {
            source: ModulatorInput::bipolar(Controller(10), Linear),
            amount: 1000.0,
            destination: Generator(Pan),
            secondary_source: None,
        },
        Modulator {
            source: ModulatorInput::unipolar_negative(Controller(11), Concave),
            amount: 960.0,
            destination: Generator(InitialAttenuation),
            secondary_source: None,
        },
        // MIDI pitch wheel, scaled by pitch wheel sensitivity, to pitch
        // directly — the one default modulator with no generator of its
        // own (§8.4.2 table 9, entry 10).
        Modulator {
            source: ModulatorInput::bipolar(PitchWheel, Linear),
            amount: 12700.0,
            destination: ModulatorDestination::Pitch,
            secondary_source: Some(ModulatorInput::unipolar_positive(PitchWheelSensitivity, Linear)),
        },
        Modulator {
            source: ModulatorInput::unipolar_positive(Controller(91), Linear),
            amount: 200.0,
            destination: Generator(ReverbEffectsSend),
            secondary_source: None,
        },
        Modulator {
            source: ModulatorInput::unipolar_positive(Controller(93), Linear),
            amount: 200.0,
            destination: Generator(ChorusEffectsSend),
            secondary_source: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_controller_is_always_one() {
        let inputs = ModulatorInputs::default();
        assert_eq!(inputs.normalized(ModulatorSource::NoController), 1.0);
    }

    #[test]
    fn velocity_modulator_scales_with_concave_curve() {
        let m = &default_modulators()[0];
        let mut inputs = ModulatorInputs::default();
        inputs.velocity = 127;
        let at_max = m.evaluate(&inputs);
        inputs.velocity = 0;
        let at_min = m.evaluate(&inputs);
        // Max velocity -> near zero attenuation; min velocity -> full amount.
        assert!(at_max.abs() < at_min.abs());
    }

    #[test]
    fn pitch_wheel_modulator_targets_direct_pitch_and_has_secondary_source() {
        let m = default_modulators()
            .into_iter()
            .find(|m| m.destination == ModulatorDestination::Pitch)
            .unwrap();
        let mut inputs = ModulatorInputs::default();
        inputs.pitch_wheel = 8191;
        inputs.pitch_wheel_sensitivity = 127;
        assert!(m.evaluate(&inputs) > 0.0);
    }
}
