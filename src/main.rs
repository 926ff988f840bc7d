//! Demo binary: opens the default audio output device, builds a
//! `Synth` loaded with a one-oscillator synthetic bank (the real
//! `.sf2` parser is out of scope for this crate, see the crate docs),
//! and forwards whatever arrives on the default MIDI input port
//! straight into the synth's control queue.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, StreamConfig};
use flexi_logger::Logger;
use log::{error, info};
use midir::{Ignore, MidiInput};

use sf2synth::soundfont::{
    GeneratorAmounts, GeneratorType, Instrument, InstrumentZone, Preset, PresetZone, Sample,
    SampleType, SoundFontBank,
};
use sf2synth::{ControlMessage, ControlSender, SynthConfig};

/// A single-oscillator bank standing in for a real `.sf2` file: one
/// preset, one instrument, one two-second looped sine sample. Good
/// enough to hear the engine run without shipping a soundfont.
struct DemoBank {
    preset: Preset,
    instrument: Instrument,
    sample: Sample,
}

impl DemoBank {
    fn new(sample_rate: u32) -> DemoBank {
        let root_key = 69; // A4
        let frequency = 440.0;
        let num_samples = sample_rate as usize * 2;
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
        generators.set(GeneratorType::SampleModes, 1);
        generators.set(GeneratorType::OverridingRootKey, root_key as i16);

        let instrument = Instrument {
            name: "demo sine".to_string(),
            zones: vec![InstrumentZone {
                key_range: (0, 127),
                vel_range: (0, 127),
                generators,
                modulators: Vec::new(),
                sample: 0,
            }],
        };

        let preset = Preset {
            name: "demo preset".to_string(),
            bank: 0,
            program: 0,
            zones: vec![PresetZone {
                key_range: (0, 127),
                vel_range: (0, 127),
                generators: GeneratorAmounts::zero(),
                modulators: Vec::new(),
                instrument: 0,
            }],
        };

        DemoBank { preset, instrument, sample }
    }
}

impl SoundFontBank for DemoBank {
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

/// Wires a `midir` input port to the synth's control queue: every
/// incoming byte string is fed through a `MidiStreamParser` and every
/// decoded message goes out on channel 0's worth of running status
/// (each message already carries its own channel).
fn spawn_midi_input(mut control_tx: ControlSender) -> Option<midir::MidiInputConnection<()>> {
    let mut midi_in = MidiInput::new("sf2synth input").ok()?;
    midi_in.ignore(Ignore::ActiveSense);

    let ports = midi_in.ports();
    let port = ports.first()?;
    let port_name = midi_in.port_name(port).unwrap_or_else(|_| "unknown".to_string());
    info!("listening on MIDI input port: {}", port_name);

    let mut parser = sf2synth::midi::MidiStreamParser::new();
    midi_in
        .connect(
            port,
            "sf2synth-read-input",
            move |_stamp, bytes, _| {
                for &byte in bytes {
                    if let Some(message) = parser.feed(byte) {
                        let channel = message.channel().unwrap_or(0);
                        control_tx.send(ControlMessage::Midi { channel, message });
                    }
                }
            },
            (),
        )
        .ok()
}

fn main() {
    Logger::with_env_or_str("sf2synth=info")
        .start()
        .expect("failed to start logger");

    let host = cpal::default_host();
    let device = host.default_output_device().expect("no default output device");
    let supported_config = device.default_output_config().expect("no default output config");
    let sample_rate = supported_config.sample_rate().0;
    let channels = supported_config.channels() as usize;
    info!("audio device: {} Hz, {} channel(s)", sample_rate, channels);

    let config = StreamConfig {
        channels: supported_config.channels(),
        sample_rate: supported_config.sample_rate(),
        buffer_size: BufferSize::Default,
    };

    let synth_config = SynthConfig {
        sample_rate,
        ..SynthConfig::default()
    };
    let (mut synth, control_tx, mut event_rx) = sf2synth::Synth::new(synth_config);
    synth
        .set_soundfont(Arc::new(DemoBank::new(sample_rate)))
        .expect("soundfont installation never fails for an in-memory bank");

    let _midi_connection = spawn_midi_input(control_tx);

    let mut left = vec![0.0f32; 4096];
    let mut right = vec![0.0f32; 4096];

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                if left.len() < frames {
                    left.resize(frames, 0.0);
                    right.resize(frames, 0.0);
                }
                synth.render_block(&mut left[..frames], &mut right[..frames]);
                for (frame, (&l, &r)) in data.chunks_mut(channels).zip(left.iter().zip(right.iter())) {
                    for (i, out) in frame.iter_mut().enumerate() {
                        *out = if i == 0 { l } else { r };
                    }
                }
                while event_rx.try_recv().is_some() {}
            },
            |err| error!("audio stream error: {}", err),
            None,
        )
        .expect("failed to build output stream");

    stream.play().expect("failed to start output stream");

    info!("sf2synth running, press Ctrl+C to exit");
    std::thread::park();
}
