//! Schroeder/Freeverb-style reverb send bus: a bank of feedback comb
//! filters in parallel, feeding a short chain of allpass filters, with
//! independent tunings per output channel for stereo width.
//!
//! Takes one mono input block (the summed per-voice reverb sends) and
//! produces a stereo wet signal; the caller mixes it back with the dry
//! path at whatever send level each voice contributed.

use crate::Float;

const COMB_TUNING_LEFT: [usize; 8] = [1557, 1617, 1491, 1422, 1277, 1356, 1188, 1116];
const ALLPASS_TUNING_LEFT: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;
const REFERENCE_SAMPLE_RATE: Float = 44100.0;

const SCALE_DAMP: Float = 0.4;
const SCALE_ROOM: Float = 0.28;
const OFFSET_ROOM: Float = 0.7;
const ALLPASS_FEEDBACK: Float = 0.5;

struct Comb {
    buffer: Vec<Float>,
    index: usize,
    feedback: Float,
    damp1: Float,
    damp2: Float,
    filter_store: Float,
}

impl Comb {
    fn new(length: usize) -> Comb {
        Comb {
            buffer: vec![0.0; length.max(1)],
            index: 0,
            feedback: 0.5,
            damp1: 0.5,
            damp2: 0.5,
            filter_store: 0.0,
        }
    }

    fn set_damp(&mut self, damp: Float) {
        self.damp1 = damp;
        self.damp2 = 1.0 - damp;
    }

    fn process(&mut self, input: Float) -> Float {
        let output = self.buffer[self.index];
        self.filter_store = output * self.damp2 + self.filter_store * self.damp1;
        self.buffer[self.index] = input + self.filter_store * self.feedback;
        self.index += 1;
        if self.index >= self.buffer.len() {
            self.index = 0;
        }
        output
    }

    fn mute(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.filter_store = 0.0;
    }
}

struct Allpass {
    buffer: Vec<Float>,
    index: usize,
    feedback: Float,
}

impl Allpass {
    fn new(length: usize) -> Allpass {
        Allpass {
            buffer: vec![0.0; length.max(1)],
            index: 0,
            feedback: ALLPASS_FEEDBACK,
        }
    }

    fn process(&mut self, input: Float) -> Float {
        let buffered = self.buffer[self.index];
        let output = -input + buffered;
        self.buffer[self.index] = input + buffered * self.feedback;
        self.index += 1;
        if self.index >= self.buffer.len() {
            self.index = 0;
        }
        output
    }

    fn mute(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
    }
}

/// One side (left or right) of the reverb tank: eight combs in
/// parallel summed into four allpasses in series.
struct Tank {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl Tank {
    fn new(spread: usize, sample_rate: u32) -> Tank {
        let scale = sample_rate as Float / REFERENCE_SAMPLE_RATE;
        let combs = COMB_TUNING_LEFT
            .iter()
            .map(|&len| Comb::new(scale_length(len + spread, scale)))
            .collect();
        let allpasses = ALLPASS_TUNING_LEFT
            .iter()
            .map(|&len| Allpass::new(scale_length(len + spread, scale)))
            .collect();
        Tank { combs, allpasses }
    }

    fn set_damp(&mut self, damp: Float) {
        for comb in &mut self.combs {
            comb.set_damp(damp);
        }
    }

    fn set_feedback(&mut self, feedback: Float) {
        for comb in &mut self.combs {
            comb.feedback = feedback;
        }
    }

    fn process(&mut self, input: Float) -> Float {
        let mut out = 0.0;
        for comb in &mut self.combs {
            out += comb.process(input);
        }
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        out
    }

    fn mute(&mut self) {
        self.combs.iter_mut().for_each(Comb::mute);
        self.allpasses.iter_mut().for_each(Allpass::mute);
    }
}

fn scale_length(reference_len: usize, scale: Float) -> usize {
    ((reference_len as Float) * scale).round().max(1.0) as usize
}

/// The reverb send bus. One instance per synth, fed the mixed reverb
/// send from every voice each block and producing a stereo wet signal
/// to mix back with the dry path.
pub struct Reverb {
    left: Tank,
    right: Tank,
    room_size: Float,
    damp: Float,
    wet_gain: Float,
}

impl Reverb {
    pub fn new(sample_rate: u32) -> Reverb {
        let mut reverb = Reverb {
            left: Tank::new(0, sample_rate),
            right: Tank::new(STEREO_SPREAD, sample_rate),
            room_size: 0.5,
            damp: 0.5,
            wet_gain: 1.0,
        };
        reverb.update();
        reverb
    }

    /// Sets the room size (0..1, larger decays longer) and damping
    /// (0..1, higher rolls off high frequencies faster in the tail).
    pub fn set_parameters(&mut self, room_size: Float, damp: Float) {
        self.room_size = room_size.clamp(0.0, 1.0);
        self.damp = damp.clamp(0.0, 1.0);
        self.update();
    }

    fn update(&mut self) {
        let feedback = self.room_size * SCALE_ROOM + OFFSET_ROOM;
        let damp = self.damp * SCALE_DAMP;
        self.left.set_feedback(feedback);
        self.right.set_feedback(feedback);
        self.left.set_damp(damp);
        self.right.set_damp(damp);
    }

    /// Renders one block: `input` is the mono reverb send mix, `out_left`
    /// and `out_right` receive the wet stereo signal (overwritten, not
    /// accumulated, so the caller controls the final dry/wet mix).
    pub fn process(&mut self, input: &[Float], out_left: &mut [Float], out_right: &mut [Float]) {
        for i in 0..input.len() {
            let sample = input[i];
            out_left[i] = self.left.process(sample) * self.wet_gain;
            out_right[i] = self.right.process(sample) * self.wet_gain;
        }
    }

    pub fn mute(&mut self) {
        self.left.mute();
        self.right.mute();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_in_produces_silence_out() {
        let mut reverb = Reverb::new(44100);
        let input = vec![0.0; 256];
        let mut left = vec![0.0; 256];
        let mut right = vec![0.0; 256];
        reverb.process(&input, &mut left, &mut right);
        assert!(left.iter().all(|&s| s == 0.0));
        assert!(right.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn an_impulse_produces_a_decaying_tail() {
        let mut reverb = Reverb::new(44100);
        let mut input = vec![0.0; 4096];
        input[0] = 1.0;
        let mut left = vec![0.0; 4096];
        let mut right = vec![0.0; 4096];
        reverb.process(&input, &mut left, &mut right);
        assert!(left[0] == 0.0, "comb filters delay before producing output");
        let tail_energy: Float = left[2000..].iter().map(|s| s * s).sum();
        assert!(tail_energy > 0.0, "reverb tank should still be ringing well after the impulse");
    }

    #[test]
    fn mute_clears_internal_state() {
        let mut reverb = Reverb::new(44100);
        let mut input = vec![0.0; 1024];
        input[0] = 1.0;
        let mut left = vec![0.0; 1024];
        let mut right = vec![0.0; 1024];
        reverb.process(&input, &mut left, &mut right);
        reverb.mute();
        let silent_input = vec![0.0; 1024];
        let mut left2 = vec![0.0; 1024];
        let mut right2 = vec![0.0; 1024];
        reverb.process(&silent_input, &mut left2, &mut right2);
        assert!(left2.iter().all(|&s| s == 0.0));
        assert!(right2.iter().all(|&s| s == 0.0));
    }
}
