//! Oscillator synthesis for synth events
//!
//! A synth instrument owns one [`SynthSettings`]: its oscillators and the
//! ADSR template. Each synth event carries a [`SynthState`] with one phase
//! slot per oscillator, so an event renders every oscillator itself and
//! never spawns child events.

pub mod wavetable;

pub use wavetable::WaveTable;

use basedrop::Shared;
use std::f32::consts::TAU;

use crate::buffer::AudioBuffer;
use crate::envelope::{Adsr, EnvelopeState};
use crate::types::{flush_denormal, MAX_OSCILLATORS};

/// Oscillator waveform
#[derive(Clone)]
pub enum Waveform {
    Sine,
    Triangle,
    Sawtooth,
    Square,
    /// White noise (ignores phase)
    Noise,
    /// Shared single-cycle table
    Table(Shared<WaveTable>),
}

impl std::fmt::Debug for Waveform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Waveform::Sine => write!(f, "Sine"),
            Waveform::Triangle => write!(f, "Triangle"),
            Waveform::Sawtooth => write!(f, "Sawtooth"),
            Waveform::Square => write!(f, "Square"),
            Waveform::Noise => write!(f, "Noise"),
            Waveform::Table(table) => write!(f, "Table({} samples)", table.len()),
        }
    }
}

/// Settings of one oscillator
#[derive(Debug, Clone)]
pub struct OscillatorSettings {
    pub waveform: Waveform,
    /// Fine tuning in cents
    pub detune: f32,
    /// Octave offset relative to the event pitch
    pub octave_shift: i32,
    /// Linear mix level
    pub volume: f32,
}

impl OscillatorSettings {
    pub fn new(waveform: Waveform) -> Self {
        Self {
            waveform,
            detune: 0.0,
            octave_shift: 0,
            volume: 1.0,
        }
    }

    /// Frequency multiplier from octave shift and detune
    #[inline]
    fn ratio(&self) -> f64 {
        2f64.powf(self.octave_shift as f64 + self.detune as f64 / 1200.0)
    }
}

/// Oscillators and envelope template of a synth instrument
#[derive(Debug, Clone)]
pub struct SynthSettings {
    oscillators: Vec<OscillatorSettings>,
    /// Envelope template; events copy it and set their own length
    pub adsr: Adsr,
    sample_rate: u32,
}

impl SynthSettings {
    /// Single sine oscillator with a flat envelope
    pub fn new(sample_rate: u32) -> Self {
        Self {
            oscillators: vec![OscillatorSettings::new(Waveform::Sine)],
            adsr: Adsr::new(sample_rate),
            sample_rate,
        }
    }

    pub fn with_oscillator(mut self, oscillator: OscillatorSettings) -> Self {
        self.add_oscillator(oscillator);
        self
    }

    /// Add an oscillator; ignored once `MAX_OSCILLATORS` are present
    pub fn add_oscillator(&mut self, oscillator: OscillatorSettings) -> bool {
        if self.oscillators.len() >= MAX_OSCILLATORS {
            return false;
        }
        self.oscillators.push(oscillator);
        true
    }

    pub fn oscillators(&self) -> &[OscillatorSettings] {
        &self.oscillators
    }

    pub fn oscillator_mut(&mut self, index: usize) -> Option<&mut OscillatorSettings> {
        self.oscillators.get_mut(index)
    }

    /// Keep at most `amount` oscillators (at least one)
    pub fn set_oscillator_amount(&mut self, amount: usize) {
        self.oscillators.truncate(amount.clamp(1, MAX_OSCILLATORS));
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.adsr.set_sample_rate(sample_rate);
    }

    /// Render `buffer.size()` samples of one event into a silent buffer
    ///
    /// Oscillators continue from the phases in `state`; the envelope is
    /// applied for event offsets starting at `state.last_write_index`,
    /// which advances by the amount rendered.
    pub fn render(&self, buffer: &mut AudioBuffer, state: &mut SynthState, envelope: &Adsr, volume: f32, live: bool) {
        let frames = buffer.size();
        if frames == 0 {
            return;
        }
        let count = self.oscillators.len().max(1) as f32;

        if let Some(out) = buffer.channel_mut(0) {
            for (k, oscillator) in self.oscillators.iter().enumerate() {
                let increment = (state.frequency * oscillator.ratio() / self.sample_rate.max(1) as f64) as f32;
                let level = oscillator.volume / count;
                let mut phase = state.phases[k];

                for sample in out.iter_mut() {
                    let value = match &oscillator.waveform {
                        Waveform::Sine => (phase * TAU).sin(),
                        Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
                        Waveform::Sawtooth => 2.0 * phase - 1.0,
                        Waveform::Square => {
                            if phase < 0.5 {
                                1.0
                            } else {
                                -1.0
                            }
                        }
                        Waveform::Noise => state.next_noise(),
                        Waveform::Table(table) => table.sample_at(phase),
                    };
                    *sample += value * level;
                    // an increment can exceed one cycle
                    phase = (phase + increment).rem_euclid(1.0);
                }
                state.phases[k] = flush_denormal(phase);
            }
        }
        buffer.apply_mono_source();

        envelope.apply(buffer, &mut state.envelope, state.last_write_index, live);
        if volume != 1.0 {
            buffer.scale(volume);
        }
        state.last_write_index += frames;
    }
}

/// Rendering progress of one synth event
#[derive(Debug, Clone, PartialEq)]
pub struct SynthState {
    /// Base frequency in Hz
    pub frequency: f64,
    phases: [f32; MAX_OSCILLATORS],
    noise_seed: u32,
    pub envelope: EnvelopeState,
    /// Event offset of the next sample to render
    pub last_write_index: usize,
}

impl SynthState {
    pub fn new(frequency: f64, envelope: &Adsr) -> Self {
        Self {
            frequency,
            phases: [0.0; MAX_OSCILLATORS],
            noise_seed: 0x1234_5678,
            envelope: EnvelopeState::initial(envelope),
            last_write_index: 0,
        }
    }

    /// Rewind to the start of the event
    pub fn restart(&mut self, envelope: &Adsr) {
        self.phases = [0.0; MAX_OSCILLATORS];
        self.envelope = EnvelopeState::initial(envelope);
        self.last_write_index = 0;
    }

    pub fn phase(&self, oscillator: usize) -> f32 {
        self.phases.get(oscillator).copied().unwrap_or(0.0)
    }

    #[inline]
    fn next_noise(&mut self) -> f32 {
        // xorshift32
        let mut x = self.noise_seed;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.noise_seed = x;
        (x as f32 / u32::MAX as f32) * 2.0 - 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::gc_handle;

    #[test]
    fn test_sine_render_is_continuous_across_calls() {
        let settings = SynthSettings::new(1000);
        let mut adsr = settings.adsr.clone();
        adsr.set_total_length(1000);
        let mut state = SynthState::new(250.0, &adsr);

        let mut first = AudioBuffer::new(2, 2);
        settings.render(&mut first, &mut state, &adsr, 1.0, false);
        let mut second = AudioBuffer::new(2, 2);
        settings.render(&mut second, &mut state, &adsr, 1.0, false);

        // 250 Hz at 1 kHz: 0, 1, 0, -1
        let left: Vec<f32> = first.channel(0).unwrap().iter().chain(second.channel(0).unwrap()).copied().collect();
        let expected = [0.0, 1.0, 0.0, -1.0];
        for (a, b) in left.iter().zip(expected) {
            assert!((a - b).abs() < 1e-5, "{:?}", left);
        }
        assert_eq!(second.channel(1).unwrap(), second.channel(0).unwrap());
        assert_eq!(state.last_write_index, 4);
    }

    #[test]
    fn test_oscillator_limit() {
        let mut settings = SynthSettings::new(44100);
        for _ in 0..MAX_OSCILLATORS * 2 {
            settings.add_oscillator(OscillatorSettings::new(Waveform::Square));
        }
        assert_eq!(settings.oscillators().len(), MAX_OSCILLATORS);
        settings.set_oscillator_amount(0);
        assert_eq!(settings.oscillators().len(), 1);
    }

    #[test]
    fn test_octave_shift_doubles_phase_speed() {
        let mut settings = SynthSettings::new(1000);
        settings.set_oscillator_amount(1);
        settings.add_oscillator(OscillatorSettings {
            octave_shift: 1,
            ..OscillatorSettings::new(Waveform::Sawtooth)
        });
        let adsr = settings.adsr.clone();
        let mut state = SynthState::new(100.0, &adsr);
        let mut buffer = AudioBuffer::new(1, 2);
        settings.render(&mut buffer, &mut state, &adsr, 1.0, false);
        assert!((state.phase(0) - 0.2).abs() < 1e-6);
        assert!((state.phase(1) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_phase_stays_in_cycle_above_sample_rate() {
        let mut settings = SynthSettings::new(1000);
        settings.set_oscillator_amount(1);
        *settings.oscillator_mut(0).unwrap() = OscillatorSettings::new(Waveform::Sawtooth);
        let mut adsr = settings.adsr.clone();
        adsr.set_total_length(1000);
        let mut state = SynthState::new(2500.0, &adsr);

        let mut buffer = AudioBuffer::new(1, 5);
        settings.render(&mut buffer, &mut state, &adsr, 1.0, false);
        let expected = [-1.0, 0.0, -1.0, 0.0, -1.0];
        for (a, b) in buffer.channel(0).unwrap().iter().zip(expected) {
            assert!((a - b).abs() < 1e-5, "{:?}", buffer.channel(0));
        }
        assert!((0.0..1.0).contains(&state.phase(0)));
    }

    #[test]
    fn test_table_waveform_and_volume() {
        let table = Shared::new(&gc_handle(), WaveTable::new(vec![0.5, 0.5]));
        let mut settings = SynthSettings::new(1000);
        settings.set_oscillator_amount(1);
        *settings.oscillator_mut(0).unwrap() = OscillatorSettings::new(Waveform::Table(table));
        let mut adsr = settings.adsr.clone();
        adsr.set_total_length(1000);
        let mut state = SynthState::new(100.0, &adsr);
        let mut buffer = AudioBuffer::new(1, 4);
        settings.render(&mut buffer, &mut state, &adsr, 0.5, false);
        assert!(buffer.channel(0).unwrap().iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }
}
