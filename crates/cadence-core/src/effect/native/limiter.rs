//! Peak limiter
//!
//! Instant gain reduction when the peak of any channel exceeds the
//! threshold, with an exponential recovery. Typically the last processor
//! on the master bus.

use crate::buffer::AudioBuffer;
use crate::effect::{ParamInfo, ParamValue, Processor, ProcessorBase, ProcessorInfo};
use crate::types::{flush_denormal, ChainId, ProcessorId, SAMPLE_RATE};

const PARAM_THRESHOLD: usize = 0;
const PARAM_RELEASE: usize = 1;

pub struct LimiterProcessor {
    base: ProcessorBase,
    sample_rate: u32,
    /// Current gain reduction multiplier (1.0 = none)
    gain: f32,
}

impl LimiterProcessor {
    pub fn new(sample_rate: u32) -> Self {
        let info = ProcessorInfo::new("Limiter", "Dynamics")
            .with_param(ParamInfo::new("Threshold", 1.0).with_range(0.1, 1.0))
            .with_param(
                ParamInfo::new("Release", 0.2)
                    .with_range(1.0, 500.0)
                    .with_unit("ms"),
            );
        Self {
            base: ProcessorBase::new(info),
            sample_rate: if sample_rate == 0 { SAMPLE_RATE } else { sample_rate },
            gain: 1.0,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.base.param_actual(PARAM_THRESHOLD)
    }

    fn release_coefficient(&self) -> f32 {
        let release_ms = self.base.param_actual(PARAM_RELEASE).max(1.0);
        let samples = release_ms / 1000.0 * self.sample_rate as f32;
        1.0 - (-1.0 / samples).exp()
    }
}

impl Processor for LimiterProcessor {
    fn process(&mut self, buffer: &mut AudioBuffer, _is_mono_source: bool) {
        if self.base.is_bypassed() {
            return;
        }
        let threshold = self.threshold();
        let release = self.release_coefficient();
        let channels = buffer.amount_of_channels();

        for i in 0..buffer.size() {
            let mut peak = 0.0f32;
            for c in 0..channels {
                if let Some(channel) = buffer.channel(c) {
                    peak = peak.max(channel[i].abs());
                }
            }
            let target = if peak > threshold { threshold / peak } else { 1.0 };
            if target < self.gain {
                self.gain = target;
            } else {
                self.gain = flush_denormal(self.gain + (target - self.gain) * release);
            }
            for c in 0..channels {
                if let Some(channel) = buffer.channel_mut(c) {
                    channel[i] *= self.gain;
                }
            }
        }
    }

    fn is_cacheable(&self) -> bool {
        false
    }

    fn info(&self) -> &ProcessorInfo {
        self.base.info()
    }

    fn id(&self) -> ProcessorId {
        self.base.id()
    }

    fn chain(&self) -> Option<ChainId> {
        self.base.chain()
    }

    fn set_chain(&mut self, chain: Option<ChainId>) {
        self.base.set_chain(chain);
    }

    fn get_params(&self) -> &[ParamValue] {
        self.base.get_params()
    }

    fn set_param(&mut self, index: usize, value: f32) {
        self.base.set_param(index, value);
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.base.set_bypass(bypass);
    }

    fn is_bypassed(&self) -> bool {
        self.base.is_bypassed()
    }

    fn reset(&mut self) {
        self.gain = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_are_held_at_threshold() {
        let mut limiter = LimiterProcessor::new(44100);
        limiter.set_param(PARAM_THRESHOLD, 0.0); // 0.1 actual
        let mut buffer = AudioBuffer::from_channels(vec![vec![0.8; 16], vec![-0.8; 16]]);
        limiter.process(&mut buffer, false);
        for c in 0..2 {
            assert!(buffer.channel(c).unwrap().iter().all(|s| s.abs() <= 0.1 + 1e-6));
        }
    }

    #[test]
    fn test_quiet_signal_passes() {
        let mut limiter = LimiterProcessor::new(44100);
        let mut buffer = AudioBuffer::from_channels(vec![vec![0.5; 8]]);
        limiter.process(&mut buffer, false);
        assert!(buffer.channel(0).unwrap().iter().all(|&s| s == 0.5));
    }
}
