//! Single-cycle wavetables
//!
//! A [`WaveTable`] holds one period of a waveform. Oscillators read it with
//! an accumulating phase in `[0, 1)` and linear interpolation, so any
//! frequency can be produced from the same table. Tables are usually
//! shared between instruments through `basedrop::Shared`.

use std::f32::consts::TAU;

use crate::types::Sample;

/// Default table length in samples
pub const DEFAULT_TABLE_LENGTH: usize = 2048;

/// One period of a waveform
#[derive(Debug, Clone, PartialEq)]
pub struct WaveTable {
    samples: Vec<Sample>,
}

impl WaveTable {
    /// Wrap existing samples; an empty table reads as silence
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Band-limited table built from `partials` sine harmonics
    ///
    /// `amplitude(n)` gives the weight of harmonic `n` (1-based). The
    /// result is normalized to a peak of 1.0.
    pub fn from_harmonics(length: usize, partials: usize, amplitude: impl Fn(usize) -> f32) -> Self {
        let mut samples = vec![0.0; length];
        for (t, sample) in samples.iter_mut().enumerate() {
            let x = t as f32 / length as f32;
            for n in 1..=partials {
                // smooth the Gibbs ripple of the truncated series
                let gibbs = ((n - 1) as f32 * std::f32::consts::PI / (2.0 * partials as f32)).cos();
                *sample += gibbs * gibbs * amplitude(n) * (n as f32 * TAU * x).sin();
            }
        }
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        if peak > 0.0 {
            samples.iter_mut().for_each(|s| *s /= peak);
        }
        Self { samples }
    }

    /// Band-limited sawtooth
    pub fn sawtooth(length: usize, partials: usize) -> Self {
        Self::from_harmonics(length, partials, |n| 1.0 / n as f32)
    }

    /// Band-limited square (odd harmonics)
    pub fn square(length: usize, partials: usize) -> Self {
        Self::from_harmonics(length, partials, |n| if n % 2 == 1 { 1.0 / n as f32 } else { 0.0 })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Interpolated value at `phase` (wrapped into `[0, 1)`)
    #[inline]
    pub fn sample_at(&self, phase: f32) -> Sample {
        let length = self.samples.len();
        if length == 0 {
            return 0.0;
        }
        let position = phase.rem_euclid(1.0) * length as f32;
        let index = (position as usize).min(length - 1);
        let frac = position - index as f32;
        let next = self.samples[(index + 1) % length];
        self.samples[index] + (next - self.samples[index]) * frac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolates_between_samples() {
        let table = WaveTable::new(vec![0.0, 1.0, 0.0, -1.0]);
        assert_eq!(table.sample_at(0.0), 0.0);
        assert_eq!(table.sample_at(0.25), 1.0);
        assert!((table.sample_at(0.125) - 0.5).abs() < 1e-6);
        // wraps from the last sample back to the first
        assert!((table.sample_at(0.875) + 0.5).abs() < 1e-6);
        assert_eq!(table.sample_at(1.25), 1.0);
    }

    #[test]
    fn test_harmonic_tables_are_normalized() {
        for table in [WaveTable::sawtooth(256, 16), WaveTable::square(256, 16)] {
            let peak = (0..table.len()).map(|i| table.sample_at(i as f32 / 256.0).abs()).fold(0.0, f32::max);
            assert!((peak - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_empty_table_is_silent() {
        assert_eq!(WaveTable::new(Vec::new()).sample_at(0.3), 0.0);
    }
}
