//! Gain processor - static volume multiplier

use crate::buffer::AudioBuffer;
use crate::effect::{ParamInfo, ParamValue, Processor, ProcessorBase, ProcessorInfo};
use crate::types::{ChainId, ProcessorId};

/// Multiplies the buffer by a fixed amount
///
/// Parameters:
/// - Gain: 0.0 = silence, 0.5 = unity, 1.0 = +6dB
///
/// Stateless and deterministic, so it is cacheable.
pub struct GainProcessor {
    base: ProcessorBase,
}

impl GainProcessor {
    pub fn new() -> Self {
        let info = ProcessorInfo::new("Gain", "Utility").with_param(
            ParamInfo::new("Gain", 0.5)
                .with_range(0.0, 2.0)
                .with_unit("×"),
        );
        Self {
            base: ProcessorBase::new(info),
        }
    }

    /// Create with an actual (not normalized) gain multiplier
    pub fn with_gain(gain: f32) -> Self {
        let mut processor = Self::new();
        processor.set_gain(gain);
        processor
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.base.set_param(0, gain / 2.0);
    }

    pub fn gain(&self) -> f32 {
        self.base.param_actual(0)
    }
}

impl Default for GainProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for GainProcessor {
    fn process(&mut self, buffer: &mut AudioBuffer, is_mono_source: bool) {
        if self.base.is_bypassed() {
            return;
        }
        let gain = self.gain();
        if is_mono_source {
            if let Some(channel) = buffer.channel_mut(0) {
                channel.iter_mut().for_each(|s| *s *= gain);
            }
            buffer.apply_mono_source();
        } else {
            buffer.scale(gain);
        }
    }

    fn is_cacheable(&self) -> bool {
        true
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

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unity() {
        let mut gain = GainProcessor::new();
        let mut buffer = AudioBuffer::from_channels(vec![vec![1.0, 0.5], vec![1.0, 0.5]]);
        gain.process(&mut buffer, false);
        assert!((buffer.channel(0).unwrap()[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_half_gain() {
        let mut gain = GainProcessor::with_gain(0.5);
        let mut buffer = AudioBuffer::from_channels(vec![vec![1.0; 2], vec![1.0; 2]]);
        gain.process(&mut buffer, false);
        assert!((buffer.channel(1).unwrap()[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mono_source_is_copied() {
        let mut gain = GainProcessor::with_gain(2.0);
        let mut buffer = AudioBuffer::from_channels(vec![vec![0.25; 2], vec![0.0; 2]]);
        gain.process(&mut buffer, true);
        assert_eq!(buffer.channel(1).unwrap(), &[0.5, 0.5]);
    }

    #[test]
    fn test_bypass() {
        let mut gain = GainProcessor::with_gain(0.0);
        gain.set_bypass(true);
        let mut buffer = AudioBuffer::from_channels(vec![vec![1.0; 2]]);
        gain.process(&mut buffer, false);
        assert_eq!(buffer.channel(0).unwrap()[0], 1.0);
    }
}
