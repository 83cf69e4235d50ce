//! Playable events
//!
//! An [`AudioEvent`] is one occurrence of sound on an instrument's
//! timeline: either a slice of sample content ([`EventKind::Sample`]) or an
//! oscillator voice shaped by an ADSR envelope ([`EventKind::Synth`]).
//!
//! ## Positions
//!
//! `start`, `length` and `end` are sample offsets on the transport with
//! `end = start + length - 1`. Whichever of the three is set last wins and
//! the others follow. Synth events ring on after their nominal end for the
//! envelope's release, so [`AudioEvent::end`] includes the release tail
//! while [`AudioEvent::nominal_end`] does not.
//!
//! ## Lifecycle
//!
//! ```text
//!   Idle ──play()──▶ Playing ──stop()──▶ Released ──(ring-out done)──▶ Removed
//! ```
//!
//! Sequenced events are mixed whenever the transport window overlaps them.
//! Live events are mixed every cycle from their own cursor until their
//! ring-out completes, after which they are flagged deletable and dropped
//! by the next event collection.
//!
//! ## Lock
//!
//! The render thread brackets each mix with [`AudioEvent::lock`] /
//! [`AudioEvent::unlock`]. Property recalculation requested in between is
//! deferred until unlock.

mod sample;
mod synth;

pub use sample::SampleContent;
pub use synth::SynthVoice;

use std::sync::atomic::{AtomicU32, Ordering};

use crate::buffer::{AudioBuffer, SampleBuffer};
use crate::envelope::Adsr;
use crate::synth::SynthSettings;
use crate::types::{to_linear, to_log, EventId, InstrumentId};

static NEXT_EVENT_ID: AtomicU32 = AtomicU32::new(1);

fn next_event_id() -> EventId {
    EventId(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Fraction of a bar a released live event keeps sounding at minimum
pub const LIVE_MIN_LENGTH_DIVIDER: usize = 64;

/// Playback state of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Idle,
    Playing,
    Released,
    Removed,
}

/// What an event plays
#[derive(Debug)]
pub enum EventKind {
    Sample(SampleContent),
    Synth(SynthVoice),
}

/// The transport window a sequenced event is mixed against
///
/// `loop_offset` is the first buffer index that belongs to the wrapped
/// head of the loop when `loop_started` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixWindow {
    /// Transport position of buffer index 0
    pub position: usize,
    pub loop_min: usize,
    pub loop_max: usize,
    pub loop_started: bool,
    pub loop_offset: usize,
    /// Last position of the channel's own range, when it has one
    pub channel_range: Option<usize>,
}

impl MixWindow {
    /// Window without loop wrap
    pub fn linear(position: usize, loop_min: usize, loop_max: usize) -> Self {
        Self {
            position,
            loop_min,
            loop_max,
            loop_started: false,
            loop_offset: 0,
            channel_range: None,
        }
    }

    /// Transport position read at buffer index `i`, `None` past the loop end
    #[inline]
    pub fn read_position(&self, i: usize) -> Option<usize> {
        let position = self.position + i;
        if let Some(max) = self.channel_range {
            return Some(position % (max + 1));
        }
        if self.loop_started && i >= self.loop_offset {
            return Some(self.loop_min + (i - self.loop_offset));
        }
        if position > self.loop_max {
            return None;
        }
        Some(position)
    }

    /// Contiguous transport ranges covered by `frames` buffer samples
    ///
    /// Yields `(transport_position, buffer_offset, length)` segments: the
    /// tail before a wrap and the head after it. A channel range shorter
    /// than the buffer wraps as often as needed.
    pub fn segments(&self, frames: usize) -> Segments {
        Segments {
            window: *self,
            frames,
            offset: 0,
        }
    }
}

/// Iterator returned by [`MixWindow::segments`]
#[derive(Debug, Clone)]
pub struct Segments {
    window: MixWindow,
    frames: usize,
    /// Next buffer index to cover
    offset: usize,
}

impl Iterator for Segments {
    type Item = (usize, usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.frames {
            return None;
        }
        let window = &self.window;
        let offset = self.offset;
        let remaining = self.frames - offset;

        let (position, length) = if let Some(max) = window.channel_range {
            let position = (window.position + offset) % (max + 1);
            (position, remaining.min(max + 1 - position))
        } else if window.loop_started && offset >= window.loop_offset {
            (window.loop_min + (offset - window.loop_offset), remaining)
        } else if window.loop_started {
            (window.position + offset, remaining.min(window.loop_offset - offset))
        } else {
            let position = window.position + offset;
            let available = (window.loop_max + 1).saturating_sub(position);
            (position, remaining.min(available))
        };

        if length == 0 {
            self.offset = self.frames;
            return None;
        }
        self.offset += length;
        Some((position, offset, length))
    }
}

/// Synth rendering resources for one mix call
pub struct SynthMix<'a> {
    pub settings: &'a SynthSettings,
    /// Scratch buffer with the output's channel layout
    pub temp: &'a mut AudioBuffer,
}

/// One playable occurrence
#[derive(Debug)]
pub struct AudioEvent {
    id: EventId,
    instrument: Option<InstrumentId>,
    start: usize,
    length: usize,
    end: usize,
    /// Logarithmically scaled volume
    volume: f32,
    enabled: bool,
    deletable: bool,
    live: bool,
    locked: bool,
    update_after_unlock: bool,
    state: EventState,
    /// Collection cycle that last picked this event (dedupe)
    pub(crate) collected_cycle: u64,
    kind: EventKind,
}

impl AudioEvent {
    fn with_kind(kind: EventKind, start: usize, length: usize, live: bool) -> Self {
        let length = length.max(1);
        Self {
            id: next_event_id(),
            instrument: None,
            start,
            length,
            end: start + length - 1,
            volume: to_log(1.0),
            enabled: true,
            deletable: false,
            live,
            locked: false,
            update_after_unlock: false,
            state: EventState::Idle,
            collected_cycle: 0,
            kind,
        }
    }

    /// Sequenced sample event playing all of `content` from `start`
    pub fn sample(content: impl Into<SampleBuffer>, start: usize) -> Self {
        let content = content.into();
        let length = content.size();
        Self::with_kind(EventKind::Sample(SampleContent::new(content)), start, length, false)
    }

    /// Live sample event (one-shot, or looping for loopable content)
    pub fn live_sample(content: impl Into<SampleBuffer>) -> Self {
        let content = content.into();
        let length = content.size();
        Self::with_kind(EventKind::Sample(SampleContent::new(content)), 0, length, true)
    }

    /// Sequenced synth event
    pub fn synth(frequency: f64, start: usize, length: usize, sample_rate: u32) -> Self {
        let voice = SynthVoice::new(frequency, Adsr::new(sample_rate));
        Self::with_kind(EventKind::Synth(voice), start, length, false)
    }

    /// Live synth event, held until `stop()`
    pub fn live_synth(frequency: f64, sample_rate: u32) -> Self {
        let voice = SynthVoice::new(frequency, Adsr::new(sample_rate));
        Self::with_kind(EventKind::Synth(voice), 0, 1, true)
    }

    /// Set the initial volume (linear 0.0-1.0)
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.set_volume(volume);
        self
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn instrument(&self) -> Option<InstrumentId> {
        self.instrument
    }

    pub(crate) fn set_instrument(&mut self, instrument: Option<InstrumentId>) {
        self.instrument = instrument;
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn is_synth(&self) -> bool {
        matches!(self.kind, EventKind::Synth(_))
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_sequenced(&self) -> bool {
        !self.live
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    // ─────────────────────────────────────────────────────────────
    // Positions
    // ─────────────────────────────────────────────────────────────

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Last sample at which the event produces sound
    pub fn end(&self) -> usize {
        self.end + self.release_duration()
    }

    /// `start + length - 1`, ignoring any release tail
    pub fn nominal_end(&self) -> usize {
        self.end
    }

    fn release_duration(&self) -> usize {
        match &self.kind {
            EventKind::Synth(voice) => voice.envelope.release_duration(),
            EventKind::Sample(_) => 0,
        }
    }

    /// Move the event, keeping its length
    pub fn set_start(&mut self, start: usize) {
        self.start = start;
        self.end = start + self.length - 1;
    }

    /// Change the length (at least one sample), keeping the start
    pub fn set_length(&mut self, length: usize) {
        self.length = length.max(1);
        self.end = self.start + self.length - 1;
    }

    /// Change the end (never before the start), keeping the start
    pub fn set_end(&mut self, end: usize) {
        self.end = end.max(self.start);
        self.length = self.end - self.start + 1;
    }

    /// Place the event on a musical grid
    ///
    /// The event starts `offset` subdivisions into measure `start_measure`;
    /// synth events also take the length of one subdivision.
    pub fn position_in_grid(&mut self, start_measure: usize, subdivisions: usize, offset: usize, samples_per_bar: usize) {
        let subdivision = samples_per_bar / subdivisions.max(1);
        self.set_start(start_measure * samples_per_bar + offset * subdivision);
        if self.is_synth() {
            self.set_length(subdivision);
        }
    }

    /// Rescale for a tempo change (`ratio` = old tempo / new tempo)
    ///
    /// Sample events keep their length (the content does not stretch),
    /// synth events scale both start and length.
    pub fn reposition_to_tempo_change(&mut self, ratio: f64) {
        let start = (self.start as f64 * ratio).round() as usize;
        if self.is_synth() {
            let length = ((self.length as f64 * ratio).round() as usize).max(1);
            self.start = start;
            self.set_length(length);
        } else {
            self.set_start(start);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Properties
    // ─────────────────────────────────────────────────────────────

    /// Volume as linear 0.0-1.0 value
    pub fn volume(&self) -> f32 {
        to_linear(self.volume)
    }

    pub fn log_volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = to_log(volume);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_deletable(&self) -> bool {
        self.deletable
    }

    /// Flag for removal by the next event collection
    pub fn set_deletable(&mut self, deletable: bool) {
        self.deletable = deletable;
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Release the lock, applying a recalculation deferred while locked
    pub fn unlock(&mut self, settings: Option<&SynthSettings>, samples_per_bar: usize) {
        self.locked = false;
        if self.update_after_unlock {
            self.update_after_unlock = false;
            self.invalidate_properties(settings, samples_per_bar);
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Recalculate length-dependent properties (synth envelope)
    ///
    /// Deferred until unlock while the event is locked.
    pub fn invalidate_properties(&mut self, settings: Option<&SynthSettings>, samples_per_bar: usize) {
        if self.locked {
            self.update_after_unlock = true;
            return;
        }
        let EventKind::Synth(voice) = &mut self.kind else {
            return;
        };
        let Some(settings) = settings else {
            return;
        };
        if self.live {
            // live events hold sustain; they only need a bar to build up
            self.length = samples_per_bar.max(1);
            self.end = self.start + self.length - 1;
        }
        voice.configure(settings, self.length);
    }

    // ─────────────────────────────────────────────────────────────
    // Playback
    // ─────────────────────────────────────────────────────────────

    /// Start (or restart) playback from the beginning
    pub fn play(&mut self) {
        self.state = EventState::Playing;
        self.deletable = false;
        match &mut self.kind {
            EventKind::Synth(voice) => voice.restart(),
            EventKind::Sample(content) => content.rewind(),
        }
    }

    /// Release the event
    ///
    /// Live synth events keep sounding for at least their release, and no
    /// less than 1/64th of a bar; a repeated stop does not shorten that.
    pub fn stop(&mut self, samples_per_bar: usize) {
        if matches!(self.state, EventState::Released | EventState::Removed) {
            return;
        }
        let live = self.live;
        match &mut self.kind {
            EventKind::Synth(voice) => {
                voice.release(live, samples_per_bar / LIVE_MIN_LENGTH_DIVIDER);
                self.state = EventState::Released;
            }
            EventKind::Sample(_) if live => {
                self.state = EventState::Removed;
                self.deletable = true;
            }
            EventKind::Sample(_) => self.state = EventState::Released,
        }
    }

    /// Mix this sequenced event's contribution for `window` into `output`
    pub fn mix_buffer(&mut self, output: &mut AudioBuffer, window: &MixWindow, synth: Option<SynthMix<'_>>) {
        if !self.enabled || self.deletable {
            return;
        }
        let (start, end, volume) = (self.start, self.end, self.volume);
        match &mut self.kind {
            EventKind::Sample(content) => content.mix(output, window, start, end, volume),
            EventKind::Synth(voice) => {
                let Some(synth) = synth else {
                    return;
                };
                let nominal_end = end;
                let end = end + voice.envelope.release_duration();
                if let Some(state) = voice.mix(output, window, start, nominal_end, end, volume, synth) {
                    self.state = state;
                }
            }
        }
    }

    /// Mix a live event once, regardless of transport position
    pub fn mix_live(&mut self, output: &mut AudioBuffer, synth: Option<SynthMix<'_>>) {
        if !self.enabled || self.deletable {
            return;
        }
        if self.state == EventState::Idle {
            self.state = EventState::Playing;
        }
        let volume = self.volume;
        let finished = match &mut self.kind {
            EventKind::Sample(content) => content.mix_live(output, volume),
            EventKind::Synth(voice) => match synth {
                Some(synth) => voice.mix_live(output, volume, synth),
                None => false,
            },
        };
        if finished {
            self.state = EventState::Removed;
            self.deletable = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SAMPLE_RATE;

    fn ramp(size: usize, offset: f32) -> AudioBuffer {
        AudioBuffer::from_channels(vec![(0..size).map(|i| offset + i as f32).collect()])
    }

    #[test]
    fn test_position_setters_keep_invariants() {
        let mut event = AudioEvent::sample(ramp(16, 1.0), 10);
        assert_eq!((event.start(), event.length(), event.end()), (10, 16, 25));

        event.set_start(20);
        assert_eq!((event.length(), event.end()), (16, 35));

        event.set_end(23);
        assert_eq!((event.start(), event.length()), (20, 4));

        event.set_end(5);
        assert_eq!((event.end(), event.length()), (20, 1));

        event.set_length(8);
        assert_eq!(event.end(), 27);
    }

    #[test]
    fn test_mix_window_segments() {
        let window = MixWindow {
            position: 12,
            loop_min: 0,
            loop_max: 15,
            loop_started: true,
            loop_offset: 4,
            channel_range: None,
        };
        assert_eq!(window.segments(8).collect::<Vec<_>>(), vec![(12, 0, 4), (0, 4, 4)]);
        assert_eq!(window.read_position(3), Some(15));
        assert_eq!(window.read_position(4), Some(0));

        let own = MixWindow {
            channel_range: Some(7),
            ..MixWindow::linear(6, 0, 31)
        };
        assert_eq!(own.segments(4).collect::<Vec<_>>(), vec![(6, 0, 2), (0, 2, 2)]);
        assert_eq!(own.read_position(2), Some(0));

        let linear = MixWindow::linear(28, 0, 31);
        assert_eq!(linear.segments(8).collect::<Vec<_>>(), vec![(28, 0, 4)]);
    }

    #[test]
    fn test_short_channel_range_wraps_every_pass() {
        let own = MixWindow {
            channel_range: Some(3),
            ..MixWindow::linear(2, 0, 63)
        };
        let segments: Vec<_> = own.segments(10).collect();
        assert_eq!(segments, vec![(2, 0, 2), (0, 2, 4), (0, 6, 4)]);
        assert!(segments.iter().all(|&(position, _, length)| position + length <= 4));
        assert_eq!(segments.iter().map(|s| s.2).sum::<usize>(), 10);
    }

    #[test]
    fn test_sample_mix_copies_overlap_only() {
        let mut event = AudioEvent::sample(ramp(4, 1.0), 2);
        let mut output = AudioBuffer::new(2, 8);
        event.mix_buffer(&mut output, &MixWindow::linear(0, 0, 31), None);

        // mono content lands on both channels
        assert_eq!(output.channel(0).unwrap(), &[0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);
        assert_eq!(output.channel(1).unwrap(), output.channel(0).unwrap());
    }

    #[test]
    fn test_sample_mix_applies_log_volume() {
        let mut event = AudioEvent::sample(ramp(2, 1.0), 0).with_volume(0.5);
        let mut output = AudioBuffer::new(1, 2);
        event.mix_buffer(&mut output, &MixWindow::linear(0, 0, 31), None);
        assert_eq!(output.channel(0).unwrap(), &[0.25, 0.5]);
    }

    #[test]
    fn test_sample_mix_stitches_loop_tail_and_head() {
        // tail event at 12..15, head event at 0..3
        let mut tail = AudioEvent::sample(ramp(4, 10.0), 12);
        let mut head = AudioEvent::sample(ramp(4, 20.0), 0);
        let window = MixWindow {
            position: 12,
            loop_min: 0,
            loop_max: 15,
            loop_started: true,
            loop_offset: 4,
            channel_range: None,
        };
        let mut output = AudioBuffer::new(1, 8);
        tail.mix_buffer(&mut output, &window, None);
        head.mix_buffer(&mut output, &window, None);
        assert_eq!(
            output.channel(0).unwrap(),
            &[10.0, 11.0, 12.0, 13.0, 20.0, 21.0, 22.0, 23.0]
        );
    }

    #[test]
    fn test_disabled_event_is_not_mixed() {
        let mut event = AudioEvent::sample(ramp(4, 1.0), 0);
        event.set_enabled(false);
        let mut output = AudioBuffer::new(1, 4);
        event.mix_buffer(&mut output, &MixWindow::linear(0, 0, 31), None);
        assert!(output.is_silent());
    }

    #[test]
    fn test_tempo_reposition() {
        let mut sample = AudioEvent::sample(ramp(100, 0.0), 1000);
        sample.reposition_to_tempo_change(0.5);
        assert_eq!((sample.start(), sample.length()), (500, 100));

        let mut synth = AudioEvent::synth(440.0, 1000, 400, SAMPLE_RATE);
        synth.reposition_to_tempo_change(0.5);
        assert_eq!((synth.start(), synth.length()), (500, 200));
    }

    #[test]
    fn test_position_in_grid() {
        let mut synth = AudioEvent::synth(440.0, 0, 1, SAMPLE_RATE);
        synth.position_in_grid(1, 16, 4, 1600);
        assert_eq!((synth.start(), synth.length()), (2000, 100));

        let mut sample = AudioEvent::sample(ramp(10, 0.0), 0);
        sample.position_in_grid(0, 4, 1, 1600);
        assert_eq!((sample.start(), sample.length()), (400, 10));
    }

    #[test]
    fn test_invalidate_is_deferred_while_locked() {
        let mut settings = SynthSettings::new(1000);
        settings.adsr.set_durations(0, 0, 0, 100);
        let mut event = AudioEvent::synth(100.0, 0, 50, 1000);

        event.lock();
        event.invalidate_properties(Some(&settings), 4000);
        assert_eq!(event.end(), 49);

        event.unlock(Some(&settings), 4000);
        assert_eq!(event.end(), 49 + 100);
    }

    #[test]
    fn test_state_transitions() {
        let mut event = AudioEvent::live_sample(ramp(4, 1.0));
        assert_eq!(event.state(), EventState::Idle);
        event.play();
        assert_eq!(event.state(), EventState::Playing);
        event.stop(1000);
        assert_eq!(event.state(), EventState::Removed);
        assert!(event.is_deletable());
    }

    #[test]
    fn test_live_sample_plays_once() {
        let mut event = AudioEvent::live_sample(ramp(6, 1.0));
        event.play();

        let mut output = AudioBuffer::new(1, 4);
        event.mix_live(&mut output, None);
        assert_eq!(output.channel(0).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        assert!(!event.is_deletable());

        let mut output = AudioBuffer::new(1, 4);
        event.mix_live(&mut output, None);
        assert_eq!(output.channel(0).unwrap(), &[5.0, 6.0, 0.0, 0.0]);
        assert!(event.is_deletable());
    }

    #[test]
    fn test_live_sample_loops_loopable_content() {
        let mut event = AudioEvent::live_sample(ramp(3, 1.0).with_loopable(true));
        event.play();
        let mut output = AudioBuffer::new(1, 8);
        event.mix_live(&mut output, None);
        assert_eq!(output.channel(0).unwrap(), &[1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0, 2.0]);
        assert!(!event.is_deletable());
    }
}
