//! Synth voice playback

use crate::buffer::AudioBuffer;
use crate::envelope::{Adsr, EnvelopeState};
use crate::synth::{SynthSettings, SynthState};

use super::{EventState, MixWindow, SynthMix};

/// Oscillator voice of a synth event
///
/// Holds a per-event copy of the instrument's envelope template sized to
/// the event length, and the rendering progress.
#[derive(Debug)]
pub struct SynthVoice {
    pub(super) envelope: Adsr,
    state: SynthState,
    /// Samples a released live voice keeps sounding
    min_length: i64,
    removal_enqueued: bool,
}

impl SynthVoice {
    pub fn new(frequency: f64, envelope: Adsr) -> Self {
        Self {
            state: SynthState::new(frequency, &envelope),
            envelope,
            min_length: 0,
            removal_enqueued: false,
        }
    }

    pub fn frequency(&self) -> f64 {
        self.state.frequency
    }

    pub fn envelope(&self) -> &Adsr {
        &self.envelope
    }

    pub fn state(&self) -> &SynthState {
        &self.state
    }

    pub fn is_removal_enqueued(&self) -> bool {
        self.removal_enqueued
    }

    /// Copy the instrument envelope for an event of `length` samples
    pub(super) fn configure(&mut self, settings: &SynthSettings, length: usize) {
        let mut envelope = settings.adsr.clone();
        envelope.set_total_length(length);
        self.envelope = envelope;
        if self.state.last_write_index == 0 && !self.state.envelope.released {
            self.state.envelope = EnvelopeState::initial(&self.envelope);
        }
    }

    pub(super) fn restart(&mut self) {
        self.state.restart(&self.envelope);
        self.min_length = 0;
        self.removal_enqueued = false;
    }

    pub(super) fn release(&mut self, live: bool, min_length: usize) {
        let ramp = if live { min_length } else { 0 };
        self.envelope
            .trigger_release(&mut self.state.envelope, self.state.last_write_index, ramp);
        if live {
            self.min_length = self.envelope.release_duration().max(min_length) as i64;
            self.removal_enqueued = true;
        }
    }

    /// Render the voice's overlap with `window`
    ///
    /// `end` includes the release tail. Returns the event state after
    /// rendering, or `None` when nothing overlapped.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn mix(
        &mut self,
        output: &mut AudioBuffer,
        window: &MixWindow,
        start: usize,
        nominal_end: usize,
        end: usize,
        volume: f32,
        mut synth: SynthMix<'_>,
    ) -> Option<EventState> {
        let mut result = None;
        for (position, buffer_offset, frames) in window.segments(output.size()) {
            if frames == 0 {
                continue;
            }
            let rendered = self.render_segment(
                output,
                (position, buffer_offset, frames),
                (start, nominal_end, end),
                volume,
                &mut synth,
            );
            if rendered.is_some() {
                result = rendered;
            }
        }
        result
    }

    fn render_segment(
        &mut self,
        output: &mut AudioBuffer,
        (position, buffer_offset, frames): (usize, usize, usize),
        (start, nominal_end, end): (usize, usize, usize),
        volume: f32,
        synth: &mut SynthMix<'_>,
    ) -> Option<EventState> {
        let last = position + frames - 1;
        if last < start || position > end {
            return None;
        }
        let write_offset = start.saturating_sub(position);
        let index = position.saturating_sub(start);

        if index == 0 {
            self.state.restart(&self.envelope);
        } else if index != self.state.last_write_index {
            // transport jumped into the middle of the event
            self.state.last_write_index = index;
        }

        let count = (frames - write_offset).min(end + 1 - (position + write_offset));
        synth.temp.resize(count);
        synth.temp.silence();
        synth
            .settings
            .render(synth.temp, &mut self.state, &self.envelope, volume, false);
        output.merge(synth.temp, 0, buffer_offset + write_offset, 1.0);

        if self.state.last_write_index > end - start {
            self.state.restart(&self.envelope);
            return Some(EventState::Idle);
        }
        if self.state.last_write_index > nominal_end - start {
            Some(EventState::Released)
        } else {
            Some(EventState::Playing)
        }
    }

    /// Render one buffer of a live voice; true once the ring-out finished
    pub(super) fn mix_live(&mut self, output: &mut AudioBuffer, volume: f32, synth: SynthMix<'_>) -> bool {
        let frames = output.size();
        if frames == 0 {
            return false;
        }
        synth.temp.resize(frames);
        synth.temp.silence();
        synth
            .settings
            .render(synth.temp, &mut self.state, &self.envelope, volume, true);

        let mut finished = false;
        if self.removal_enqueued {
            self.min_length -= frames as i64;
            if self.min_length <= 0 {
                fade_out_tail(synth.temp, frames.div_ceil(4));
                finished = true;
            }
        }
        output.merge(synth.temp, 0, 0, 1.0);
        finished
    }
}

/// Linear fade over the last `length` samples, ending at zero
fn fade_out_tail(buffer: &mut AudioBuffer, length: usize) {
    let frames = buffer.size();
    let length = length.clamp(1, frames.max(1));
    let from = frames.saturating_sub(length);
    for channel in buffer.channels_mut() {
        for (j, sample) in channel[from..frames].iter_mut().enumerate() {
            *sample *= (length - 1 - j) as f32 / length as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AudioEvent;

    fn settings(release: usize) -> SynthSettings {
        let mut settings = SynthSettings::new(1000);
        settings.adsr.set_durations(0, 0, 0, release);
        settings
    }

    fn mix_sequenced(event: &mut AudioEvent, settings: &SynthSettings, window: MixWindow, frames: usize) -> AudioBuffer {
        let mut output = AudioBuffer::new(2, frames);
        let mut temp = AudioBuffer::new(2, frames);
        event.mix_buffer(
            &mut output,
            &window,
            Some(SynthMix {
                settings,
                temp: &mut temp,
            }),
        );
        output
    }

    #[test]
    fn test_sequenced_synth_renders_from_start_offset() {
        let settings = settings(0);
        let mut event = AudioEvent::synth(250.0, 2, 4, 1000);
        event.invalidate_properties(Some(&settings), 4000);

        let output = mix_sequenced(&mut event, &settings, MixWindow::linear(0, 0, 99), 8);
        let left = output.channel(0).unwrap();
        let expected = [0.0, 0.0, 0.0, 1.0, 0.0, -1.0, 0.0, 0.0];
        for (a, b) in left.iter().zip(expected) {
            assert!((a - b).abs() < 1e-5, "{:?}", left);
        }
        assert_eq!(output.channel(1).unwrap(), left);
        // rendered through its end: ready to play again
        assert_eq!(event.state(), EventState::Idle);
    }

    #[test]
    fn test_sequenced_synth_continues_across_buffers() {
        let settings = settings(0);
        let mut event = AudioEvent::synth(250.0, 0, 8, 1000);
        event.invalidate_properties(Some(&settings), 4000);

        mix_sequenced(&mut event, &settings, MixWindow::linear(0, 0, 99), 4);
        assert_eq!(event.state(), EventState::Playing);
        let second = mix_sequenced(&mut event, &settings, MixWindow::linear(4, 0, 99), 4);
        assert!((second.channel(0).unwrap()[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_short_channel_range_replays_each_pass() {
        let settings = settings(0);
        let mut event = AudioEvent::synth(250.0, 0, 2, 1000);
        event.invalidate_properties(Some(&settings), 4000);

        let window = MixWindow {
            channel_range: Some(3),
            ..MixWindow::linear(2, 0, 99)
        };
        let output = mix_sequenced(&mut event, &settings, window, 10);
        let left = output.channel(0).unwrap();
        let expected = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        for (a, b) in left.iter().zip(expected) {
            assert!((a - b).abs() < 1e-5, "{:?}", left);
        }
    }

    #[test]
    fn test_release_tail_extends_rendering() {
        let settings = settings(4);
        let mut event = AudioEvent::synth(250.0, 0, 4, 1000);
        event.invalidate_properties(Some(&settings), 4000);
        assert_eq!(event.end(), 7);

        mix_sequenced(&mut event, &settings, MixWindow::linear(0, 0, 99), 6);
        assert_eq!(event.state(), EventState::Released);
    }

    #[test]
    fn test_live_synth_rings_out_then_becomes_deletable() {
        let settings = settings(100);
        let mut event = AudioEvent::live_synth(250.0, 1000);
        event.invalidate_properties(Some(&settings), 6400);
        event.play();

        let mut temp = AudioBuffer::new(2, 32);
        let mut mix = |event: &mut AudioEvent| {
            let mut output = AudioBuffer::new(2, 32);
            event.mix_live(
                &mut output,
                Some(SynthMix {
                    settings: &settings,
                    temp: &mut temp,
                }),
            );
            output
        };

        let held = mix(&mut event);
        assert!(!held.is_silent());

        event.stop(6400);
        event.stop(6400);
        assert_eq!(event.state(), EventState::Released);

        let mut calls = 0;
        let mut last = held;
        while !event.is_deletable() {
            last = mix(&mut event);
            calls += 1;
            assert!(calls < 10);
        }
        // max(release 100, 6400 / 64) samples: four buffers of 32
        assert_eq!(calls, 4);
        assert_eq!(event.state(), EventState::Removed);
        assert_eq!(last.channel(0).unwrap()[31], 0.0);
    }

    #[test]
    fn test_fade_out_tail() {
        let mut buffer = AudioBuffer::from_channels(vec![vec![1.0; 8]]);
        fade_out_tail(&mut buffer, 2);
        assert_eq!(buffer.channel(0).unwrap(), &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.5, 0.0]);
    }
}
