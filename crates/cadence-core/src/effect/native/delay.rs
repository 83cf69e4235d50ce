//! Feedback delay (bus kind)
//!
//! Used as a send: `apply()` feeds the dry signal into the delay line and
//! adds only the wet output on top of the channel. Used as an insert,
//! `process()` crossfades dry and wet by the mix amount.

use crate::buffer::AudioBuffer;
use crate::effect::{ParamInfo, ParamValue, Processor, ProcessorBase, ProcessorInfo, ProcessorKind};
use crate::types::{flush_denormal, ChainId, ProcessorId};

/// Maximum delay time in seconds
const MAX_DELAY_SECONDS: f32 = 2.0;
/// Delay lines allocated up front (stereo)
const DELAY_CHANNELS: usize = 2;

const PARAM_TIME: usize = 0;
const PARAM_FEEDBACK: usize = 1;
const PARAM_MIX: usize = 2;
const PARAM_SYNC: usize = 3;

struct DelayLine {
    samples: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    fn new(length: usize) -> Self {
        Self {
            samples: vec![0.0; length.max(1)],
            write_pos: 0,
        }
    }

    /// Read the delayed sample, write input plus feedback, advance
    #[inline]
    fn tick(&mut self, input: f32, delay: usize, feedback: f32) -> f32 {
        let length = self.samples.len();
        let read_pos = (self.write_pos + length - delay.min(length - 1)) % length;
        let delayed = self.samples[read_pos];
        self.samples[self.write_pos] = flush_denormal(input + delayed * feedback);
        self.write_pos = (self.write_pos + 1) % length;
        delayed
    }

    fn clear(&mut self) {
        self.samples.fill(0.0);
        self.write_pos = 0;
    }
}

/// Feedback delay with optional tempo sync (one beat)
///
/// Parameters:
/// - Time: 10-2000 ms
/// - Feedback: 0-95%
/// - Mix: wet amount
/// - Sync: above 0.5 the time follows one beat of the current tempo
pub struct DelayProcessor {
    base: ProcessorBase,
    lines: Vec<DelayLine>,
    sample_rate: u32,
    delay_samples: usize,
    tempo: f64,
}

impl DelayProcessor {
    pub fn new(sample_rate: u32) -> Self {
        let info = ProcessorInfo::new("Delay", "Delay")
            .with_kind(ProcessorKind::Bus)
            .with_param(ParamInfo::new("Time", 0.125).with_range(10.0, 2000.0).with_unit("ms"))
            .with_param(ParamInfo::new("Feedback", 0.4).with_range(0.0, 0.95))
            .with_param(ParamInfo::new("Mix", 0.3))
            .with_param(ParamInfo::new("Sync", 0.0));

        let length = (sample_rate as f32 * MAX_DELAY_SECONDS) as usize;
        let mut delay = Self {
            base: ProcessorBase::new(info),
            lines: (0..DELAY_CHANNELS).map(|_| DelayLine::new(length)).collect(),
            sample_rate,
            delay_samples: 0,
            tempo: 120.0,
        };
        delay.update_delay_time();
        delay
    }

    fn update_delay_time(&mut self) {
        let seconds = if self.base.param_actual(PARAM_SYNC) > 0.5 {
            60.0 / self.tempo.max(1.0)
        } else {
            self.base.param_actual(PARAM_TIME) as f64 / 1000.0
        };
        self.delay_samples = (seconds * self.sample_rate as f64) as usize;
    }

    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }

    fn feedback(&self) -> f32 {
        self.base.param_actual(PARAM_FEEDBACK)
    }

    fn mix(&self) -> f32 {
        self.base.param_actual(PARAM_MIX)
    }
}

impl Processor for DelayProcessor {
    fn process(&mut self, buffer: &mut AudioBuffer, _is_mono_source: bool) {
        if self.base.is_bypassed() {
            return;
        }
        let (feedback, mix, delay) = (self.feedback(), self.mix(), self.delay_samples);
        for (line, channel) in self.lines.iter_mut().zip(buffer.channels_mut()) {
            for sample in channel.iter_mut() {
                let wet = line.tick(*sample, delay, feedback);
                *sample = *sample * (1.0 - mix) + wet * mix;
            }
        }
    }

    fn apply(&mut self, source: &AudioBuffer, output: &mut AudioBuffer, _is_mono_source: bool) {
        if self.base.is_bypassed() {
            return;
        }
        let (feedback, mix, delay) = (self.feedback(), self.mix(), self.delay_samples);
        for (c, line) in self.lines.iter_mut().enumerate() {
            let (Some(dry), Some(out)) = (source.channel(c), output.channel_mut(c)) else {
                continue;
            };
            for (input, sample) in dry.iter().zip(out.iter_mut()) {
                *sample += line.tick(*input, delay, feedback) * mix;
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
        if index == PARAM_TIME || index == PARAM_SYNC {
            self.update_delay_time();
        }
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.base.set_bypass(bypass);
    }

    fn is_bypassed(&self) -> bool {
        self.base.is_bypassed()
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.clear();
        }
    }

    fn set_tempo(&mut self, tempo: f64, sample_rate: u32) {
        self.tempo = tempo;
        if sample_rate != self.sample_rate && sample_rate > 0 {
            // line length stays, only the read distance follows the new rate
            self.sample_rate = sample_rate;
        }
        self.update_delay_time();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(size: usize) -> AudioBuffer {
        let mut channel = vec![0.0; size];
        channel[0] = 1.0;
        AudioBuffer::from_channels(vec![channel.clone(), channel])
    }

    #[test]
    fn test_bus_apply_keeps_dry_and_adds_echo() {
        let mut delay = DelayProcessor::new(1000);
        delay.set_param(PARAM_TIME, 0.0); // 10ms = 10 samples at 1kHz
        delay.set_param(PARAM_MIX, 0.5);
        assert_eq!(delay.delay_samples(), 10);

        let source = impulse(16);
        let mut output = impulse(16);
        delay.apply(&source, &mut output, false);

        let left = output.channel(0).unwrap();
        assert_eq!(left[0], 1.0);
        assert!((left[10] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_tempo_sync_follows_beat_length() {
        let mut delay = DelayProcessor::new(1000);
        delay.set_param(PARAM_SYNC, 1.0);
        delay.set_tempo(120.0, 1000);
        assert_eq!(delay.delay_samples(), 500);
    }

    #[test]
    fn test_is_bus_kind_and_not_cacheable() {
        let delay = DelayProcessor::new(44100);
        assert_eq!(delay.kind(), ProcessorKind::Bus);
        assert!(!delay.is_cacheable());
    }
}
