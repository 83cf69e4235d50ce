//! ADSR amplitude envelope
//!
//! [`Adsr`] turns attack/decay/release times (seconds) and a sustain level
//! into sample breakpoints for one event length:
//!
//! ```text
//!  1.0 ┤   /\
//!      │  /  \___________ sustain
//!      │ /               \
//!  0.0 ┼/─────────────────\────
//!      0  decay  sustain  release   release_start + release_duration
//!         start  start    start
//! ```
//!
//! `release_start` is the event's total length: sequenced events release
//! on schedule. Live events hold sustain until released (key-up), at which
//! point the release ramps down from whatever level the envelope had at
//! that instant. Per-event progress lives in [`EnvelopeState`]; the
//! `Adsr` itself is immutable while applying.

use crate::buffer::AudioBuffer;
use crate::types::flush_denormal;

/// Attack ramps are never shorter than this many samples
pub const MIN_ATTACK_DURATION: usize = 8;

/// Envelope generator configured for one event length
#[derive(Debug, Clone, PartialEq)]
pub struct Adsr {
    sample_rate: u32,
    attack_time: f32,
    decay_time: f32,
    sustain_level: f32,
    release_time: f32,

    total_length: usize,
    attack_duration: usize,
    decay_duration: usize,
    sustain_duration: usize,
    release_duration: usize,

    decay_start: usize,
    sustain_start: usize,
    release_start: usize,

    attack_increment: f32,
    decay_decrement: f32,
    /// Envelope level at `release_start` when following the schedule
    scheduled_release_level: f32,
}

/// Per-event envelope progress
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeState {
    /// Last computed envelope value
    pub envelope: f32,
    /// Release was forced (key-up) rather than scheduled
    pub released: bool,
    /// Envelope level captured when the release was forced
    pub release_level: f32,
    /// Event offset at which the forced release began
    pub release_offset: usize,
    /// Samples the forced release ramps over
    pub release_length: usize,
}

impl EnvelopeState {
    /// State for a freshly (re)started event
    pub fn initial(adsr: &Adsr) -> Self {
        Self {
            envelope: if adsr.attack_duration > 0 { 0.0 } else { 1.0 },
            released: false,
            release_level: 0.0,
            release_offset: 0,
            release_length: 0,
        }
    }
}

impl Adsr {
    /// Flat envelope: no attack, no decay, full sustain, no release
    pub fn new(sample_rate: u32) -> Self {
        let mut adsr = Self {
            sample_rate,
            attack_time: 0.0,
            decay_time: 0.0,
            sustain_level: 1.0,
            release_time: 0.0,
            total_length: 0,
            attack_duration: 0,
            decay_duration: 0,
            sustain_duration: 0,
            release_duration: 0,
            decay_start: 0,
            sustain_start: 0,
            release_start: 0,
            attack_increment: 0.0,
            decay_decrement: 0.0,
            scheduled_release_level: 1.0,
        };
        adsr.calculate();
        adsr
    }

    /// Configure from times in seconds for an event of `total_length` samples
    pub fn configure(
        &mut self,
        attack: f32,
        decay: f32,
        sustain_level: f32,
        release: f32,
        total_length: usize,
    ) {
        self.attack_time = attack.max(0.0);
        self.decay_time = decay.max(0.0);
        self.sustain_level = sustain_level.clamp(0.0, 1.0);
        self.release_time = release.max(0.0);
        self.total_length = total_length;

        let sr = self.sample_rate as f32;
        self.attack_duration = if self.attack_time > 0.0 {
            ((self.attack_time * sr) as usize).max(MIN_ATTACK_DURATION)
        } else {
            0
        };
        self.decay_duration = (self.decay_time * sr) as usize;
        self.release_duration = (self.release_time * sr) as usize;
        self.calculate();
    }

    /// Configure directly in samples
    pub fn set_durations(&mut self, attack: usize, decay: usize, total_length: usize, release: usize) {
        self.attack_duration = attack;
        self.decay_duration = decay;
        self.total_length = total_length;
        self.release_duration = release;

        let sr = self.sample_rate.max(1) as f32;
        self.attack_time = attack as f32 / sr;
        self.decay_time = decay as f32 / sr;
        self.release_time = release as f32 / sr;
        self.calculate();
    }

    pub fn set_sustain_level(&mut self, level: f32) {
        self.sustain_level = level.clamp(0.0, 1.0);
        self.calculate();
    }

    /// Recalculate breakpoints for a new event length
    pub fn set_total_length(&mut self, total_length: usize) {
        self.total_length = total_length;
        self.calculate();
    }

    /// Follow a sample rate change, keeping the configured times
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.configure(
            self.attack_time,
            self.decay_time,
            self.sustain_level,
            self.release_time,
            self.total_length,
        );
    }

    fn calculate(&mut self) {
        let total = self.total_length;
        self.sustain_duration = total.saturating_sub(self.attack_duration + self.decay_duration);

        self.decay_start = self.attack_duration.min(total);
        self.sustain_start = (self.decay_start + self.decay_duration).min(total);
        self.release_start = total;

        self.attack_increment = if self.attack_duration > 0 {
            1.0 / self.attack_duration as f32
        } else {
            0.0
        };
        self.decay_decrement = if self.decay_duration > 0 {
            (1.0 - self.sustain_level) / self.decay_duration as f32
        } else {
            0.0
        };
        // level the schedule reaches at release_start, also when the event
        // is too short to complete its attack or decay
        let end = self.release_start;
        self.scheduled_release_level = if end < self.attack_duration {
            end as f32 * self.attack_increment
        } else if end < self.attack_duration + self.decay_duration {
            1.0 - (end - self.attack_duration) as f32 * self.decay_decrement
        } else {
            self.sustain_level
        };
    }

    pub fn attack_duration(&self) -> usize {
        self.attack_duration
    }

    pub fn decay_duration(&self) -> usize {
        self.decay_duration
    }

    pub fn sustain_duration(&self) -> usize {
        self.sustain_duration
    }

    pub fn release_duration(&self) -> usize {
        self.release_duration
    }

    pub fn sustain_level(&self) -> f32 {
        self.sustain_level
    }

    pub fn decay_start(&self) -> usize {
        self.decay_start
    }

    pub fn sustain_start(&self) -> usize {
        self.sustain_start
    }

    pub fn release_start(&self) -> usize {
        self.release_start
    }

    pub fn total_length(&self) -> usize {
        self.total_length
    }

    /// Value before any release: attack, decay, or sustain
    #[inline]
    fn held_value(&self, offset: usize) -> f32 {
        if offset < self.decay_start {
            offset as f32 * self.attack_increment
        } else if offset < self.sustain_start {
            1.0 - (offset - self.decay_start) as f32 * self.decay_decrement
        } else {
            self.sustain_level
        }
    }

    /// Ramp from `level` at `from` down to zero over `length` samples
    #[inline]
    fn release_value(level: f32, from: usize, length: usize, offset: usize) -> f32 {
        if length == 0 {
            return 0.0;
        }
        let elapsed = offset.saturating_sub(from) as f32;
        (level - elapsed * (level / length as f32)).max(0.0)
    }

    /// Envelope value at an event offset
    ///
    /// `live` events never release on schedule, only when forced.
    #[inline]
    pub fn value_at(&self, offset: usize, state: &EnvelopeState, live: bool) -> f32 {
        let value = if state.released && offset >= state.release_offset {
            Self::release_value(state.release_level, state.release_offset, state.release_length, offset)
        } else if !live && offset >= self.release_start {
            Self::release_value(
                self.scheduled_release_level,
                self.release_start,
                self.release_duration,
                offset,
            )
        } else {
            self.held_value(offset)
        };
        flush_denormal(value.clamp(0.0, 1.0))
    }

    /// Force the release at `offset`, ramping down from the current level
    ///
    /// The ramp lasts at least `min_length` samples, so a voice without a
    /// release of its own still fades out instead of cutting off.
    pub fn trigger_release(&self, state: &mut EnvelopeState, offset: usize, min_length: usize) {
        if state.released {
            return;
        }
        state.released = true;
        state.release_level = state.envelope;
        state.release_offset = offset;
        state.release_length = self.release_duration.max(min_length);
    }

    /// Multiply `buffer` by the envelope for event offsets
    /// `write_offset .. write_offset + buffer.size()`
    pub fn apply(&self, buffer: &mut AudioBuffer, state: &mut EnvelopeState, write_offset: usize, live: bool) {
        let frames = buffer.size();
        if frames == 0 {
            return;
        }
        let last = write_offset + frames - 1;

        // steady regions scale uniformly
        if let Some(level) = self.uniform_level(write_offset, last, state, live) {
            buffer.scale(level);
            state.envelope = level;
            return;
        }

        let mut envelope = state.envelope;
        for i in 0..frames {
            envelope = self.value_at(write_offset + i, state, live);
            for channel in buffer.channels_mut() {
                channel[i] *= envelope;
            }
        }
        state.envelope = envelope;
    }

    /// Constant envelope level over `[first, last]`, if there is one
    fn uniform_level(&self, first: usize, last: usize, state: &EnvelopeState, live: bool) -> Option<f32> {
        if state.released {
            let silent_from = state.release_offset + state.release_length;
            return (first >= state.release_offset && first >= silent_from).then_some(0.0);
        }
        let sustain_end = if live { usize::MAX } else { self.release_start };
        (first >= self.sustain_start && last < sustain_end).then(|| flush_denormal(self.sustain_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(size: usize) -> AudioBuffer {
        AudioBuffer::from_channels(vec![vec![1.0; size], vec![1.0; size]])
    }

    fn assert_values(buffer: &AudioBuffer, expected: &[f32]) {
        for (c, channel) in [buffer.channel(0).unwrap(), buffer.channel(1).unwrap()].iter().enumerate() {
            for (i, (actual, wanted)) in channel.iter().zip(expected).enumerate() {
                assert!(
                    (actual - wanted).abs() < 1e-6,
                    "channel {} sample {}: {} != {}",
                    c,
                    i,
                    actual,
                    wanted
                );
            }
        }
    }

    #[test]
    fn test_breakpoints() {
        let mut adsr = Adsr::new(44100);
        adsr.set_durations(2, 2, 8, 8);
        assert_eq!(adsr.decay_start(), 2);
        assert_eq!(adsr.sustain_start(), 4);
        assert_eq!(adsr.release_start(), 8);
        assert_eq!(adsr.sustain_duration(), 4);
    }

    #[test]
    fn test_apply_full_envelope() {
        let mut adsr = Adsr::new(44100);
        adsr.set_sustain_level(0.5);
        adsr.set_durations(2, 2, 8, 8);

        let mut state = EnvelopeState::initial(&adsr);
        let mut buffer = ones(16);
        adsr.apply(&mut buffer, &mut state, 0, false);

        assert_values(
            &buffer,
            &[
                0.0, 0.5, 1.0, 0.75, 0.5, 0.5, 0.5, 0.5, 0.5, 0.4375, 0.375, 0.3125, 0.25, 0.1875,
                0.125, 0.0625,
            ],
        );
        assert!((state.envelope - 0.0625).abs() < 1e-6);
    }

    #[test]
    fn test_apply_zero_sustain() {
        let mut adsr = Adsr::new(44100);
        adsr.set_sustain_level(0.0);
        adsr.set_durations(2, 4, 8, 16);

        let mut state = EnvelopeState::initial(&adsr);
        let mut buffer = ones(16);
        adsr.apply(&mut buffer, &mut state, 0, false);

        let mut expected = vec![0.0, 0.5, 1.0, 0.75, 0.5, 0.25];
        expected.resize(16, 0.0);
        assert_values(&buffer, &expected);
    }

    #[test]
    fn test_zero_attack_starts_at_full_level() {
        let mut adsr = Adsr::new(44100);
        adsr.configure(0.0, 0.0, 1.0, 0.0, 32);
        let state = EnvelopeState::initial(&adsr);
        assert_eq!(state.envelope, 1.0);
        assert_eq!(adsr.value_at(0, &state, false), 1.0);
    }

    #[test]
    fn test_attack_rises_from_zero_to_one() {
        let mut adsr = Adsr::new(1000);
        adsr.configure(0.016, 0.0, 1.0, 0.0, 64);
        assert_eq!(adsr.attack_duration(), 16);

        let state = EnvelopeState::initial(&adsr);
        assert_eq!(adsr.value_at(0, &state, false), 0.0);
        assert_eq!(adsr.value_at(16, &state, false), 1.0);
    }

    #[test]
    fn test_attack_has_minimum_duration() {
        let mut adsr = Adsr::new(44100);
        adsr.configure(1.0e-6, 0.0, 1.0, 0.0, 1000);
        assert_eq!(adsr.attack_duration(), MIN_ATTACK_DURATION);
    }

    #[test]
    fn test_attack_only_leaves_last_value() {
        let mut adsr = Adsr::new(44100);
        adsr.set_durations(8, 0, 64, 0);
        let mut state = EnvelopeState::initial(&adsr);
        let mut buffer = ones(8);
        adsr.apply(&mut buffer, &mut state, 0, false);
        assert!((state.envelope - 0.875).abs() < 1e-6);
    }

    #[test]
    fn test_live_event_holds_sustain_until_released() {
        let mut adsr = Adsr::new(44100);
        adsr.set_sustain_level(0.5);
        adsr.set_durations(2, 2, 8, 8);
        let mut state = EnvelopeState::initial(&adsr);

        // far past release_start, still sustaining
        let mut buffer = ones(8);
        adsr.apply(&mut buffer, &mut state, 100, true);
        assert_values(&buffer, &[0.5; 8]);

        // key-up at offset 108 ramps down from the held level
        adsr.trigger_release(&mut state, 108, 0);
        let mut buffer = ones(8);
        adsr.apply(&mut buffer, &mut state, 108, true);
        assert_values(&buffer, &[0.5, 0.4375, 0.375, 0.3125, 0.25, 0.1875, 0.125, 0.0625]);

        let mut buffer = ones(4);
        adsr.apply(&mut buffer, &mut state, 116, true);
        assert!(buffer.is_silent());
    }

    #[test]
    fn test_forced_release_without_release_ramps_over_min_length() {
        let adsr = Adsr::new(44100);
        assert_eq!(adsr.release_duration(), 0);
        let mut state = EnvelopeState::initial(&adsr);

        adsr.trigger_release(&mut state, 10, 8);
        assert_eq!(state.release_length, 8);

        let mut buffer = ones(10);
        adsr.apply(&mut buffer, &mut state, 10, true);
        assert_values(&buffer, &[1.0, 0.875, 0.75, 0.625, 0.5, 0.375, 0.25, 0.125, 0.0, 0.0]);
    }

    #[test]
    fn test_forced_release_keeps_longer_release() {
        let mut adsr = Adsr::new(44100);
        adsr.set_durations(0, 0, 0, 16);
        let mut state = EnvelopeState::initial(&adsr);
        adsr.trigger_release(&mut state, 0, 4);
        assert_eq!(state.release_length, 16);
        assert!((adsr.value_at(8, &state, true) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_release_during_attack_uses_current_level() {
        let mut adsr = Adsr::new(44100);
        adsr.set_durations(8, 0, 64, 4);
        let mut state = EnvelopeState::initial(&adsr);

        let mut buffer = ones(4);
        adsr.apply(&mut buffer, &mut state, 0, true);
        assert!((state.envelope - 0.375).abs() < 1e-6);

        adsr.trigger_release(&mut state, 4, 0);
        assert!((adsr.value_at(4, &state, true) - 0.375).abs() < 1e-6);
        assert!(adsr.value_at(6, &state, true) < 0.375);
    }

    #[test]
    fn test_uniform_path_matches_per_sample_path() {
        let mut adsr = Adsr::new(44100);
        adsr.set_sustain_level(0.3);
        adsr.set_durations(4, 4, 64, 8);

        let mut state = EnvelopeState::initial(&adsr);
        let mut fast = ones(16);
        adsr.apply(&mut fast, &mut state, 16, false);

        let reference = EnvelopeState::initial(&adsr);
        for i in 0..16 {
            let expected = adsr.value_at(16 + i, &reference, false);
            assert_eq!(fast.channel(0).unwrap()[i], expected);
        }
    }

    #[test]
    fn test_breakpoint_ordering_and_monotonic_phases() {
        let sample_rate = 1000;
        for &(attack, decay, sustain, release, length) in &[
            (0.0f32, 0.0f32, 1.0f32, 0.0f32, 100usize),
            (0.01, 0.02, 0.5, 0.05, 100),
            (0.2, 0.1, 0.7, 0.01, 100),
            (0.05, 0.5, 0.0, 0.1, 40),
            (0.001, 0.001, 0.25, 0.3, 10),
        ] {
            let mut adsr = Adsr::new(sample_rate);
            adsr.configure(attack, decay, sustain, release, length);

            assert!(adsr.decay_start() <= adsr.sustain_start());
            assert!(adsr.sustain_start() <= adsr.release_start());
            assert!(adsr.release_start() <= length + adsr.release_duration());

            let state = EnvelopeState::initial(&adsr);
            let values: Vec<f32> = (0..length + adsr.release_duration())
                .map(|i| adsr.value_at(i, &state, false))
                .collect();

            for i in 1..values.len() {
                let (prev, cur) = (values[i - 1], values[i]);
                if i < adsr.decay_start() {
                    assert!(cur >= prev, "attack must not fall");
                } else if i > adsr.decay_start() && i <= adsr.sustain_start() {
                    assert!(cur <= prev + 1e-6, "decay must not rise");
                } else if i > adsr.sustain_start() && i < adsr.release_start() {
                    assert_eq!(cur, prev, "sustain is constant");
                } else if i > adsr.release_start() {
                    assert!(cur <= prev + 1e-6, "release must not rise");
                }
            }
        }
    }
}
