//! Sample content playback

use crate::buffer::{AudioBuffer, SampleBuffer};

use super::MixWindow;

/// Sample content of a sample event plus its live read cursor
#[derive(Debug)]
pub struct SampleContent {
    buffer: SampleBuffer,
    /// Next content offset for live playback
    read_pointer: usize,
}

impl SampleContent {
    pub fn new(buffer: SampleBuffer) -> Self {
        Self {
            buffer,
            read_pointer: 0,
        }
    }

    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    pub fn read_pointer(&self) -> usize {
        self.read_pointer
    }

    pub(super) fn rewind(&mut self) {
        self.read_pointer = 0;
    }

    /// Accumulate the part of `[start, end]` that `window` covers
    ///
    /// Content with fewer channels than the output feeds the remaining
    /// output channels from its last channel.
    pub(super) fn mix(&self, output: &mut AudioBuffer, window: &MixWindow, start: usize, end: usize, volume: f32) {
        let source_channels = self.buffer.amount_of_channels();
        if source_channels == 0 || self.buffer.size() == 0 || volume == 0.0 {
            return;
        }
        let frames = output.size();

        for c in 0..output.amount_of_channels() {
            let Some(source) = self.buffer.channel(c.min(source_channels - 1)) else {
                continue;
            };
            let Some(out) = output.channel_mut(c) else {
                continue;
            };
            for (i, sample) in out.iter_mut().enumerate().take(frames) {
                let Some(position) = window.read_position(i) else {
                    break;
                };
                if position < start || position > end {
                    continue;
                }
                if let Some(value) = source.get(position - start) {
                    *sample += value * volume;
                }
            }
        }
    }

    /// Mix one buffer from the read cursor; true once one-shot content ran out
    pub(super) fn mix_live(&mut self, output: &mut AudioBuffer, volume: f32) -> bool {
        let length = self.buffer.size();
        let source_channels = self.buffer.amount_of_channels();
        if length == 0 || source_channels == 0 {
            return true;
        }
        let loopable = self.buffer.is_loopable();
        let frames = output.size();

        for c in 0..output.amount_of_channels() {
            let Some(source) = self.buffer.channel(c.min(source_channels - 1)) else {
                continue;
            };
            let Some(out) = output.channel_mut(c) else {
                continue;
            };
            let mut r = self.read_pointer;
            for sample in out.iter_mut().take(frames) {
                if r >= length {
                    if !loopable {
                        break;
                    }
                    r = 0;
                }
                *sample += source[r] * volume;
                r += 1;
            }
        }

        self.read_pointer += frames;
        if loopable {
            self.read_pointer %= length;
            false
        } else {
            self.read_pointer >= length
        }
    }
}
