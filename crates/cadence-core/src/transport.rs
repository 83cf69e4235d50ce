//! Transport: position, loop range, tempo and musical timing
//!
//! The transport is owned by the render thread. It advances one sample at
//! a time and reports step boundaries and the notification marker at the
//! exact sample they occur:
//!
//! ```text
//!   min_position                                   max_position
//!        │◀──────────────── loop range ──────────────────▶│
//!        │ step 0 │ step 1 │ step 2 │ ...                 │ ─┐
//!        ▲                                                   │ wrap
//!        └───────────────────────────────────────────────────┘
//! ```
//!
//! Tempo changes requested during a cycle are queued and applied at the
//! cycle boundary, rescaling every transport position by old/new tempo.
//! Control threads read the state through [`TransportAtomics`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Musical time signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Beats per bar
    pub beat_amount: u32,
    /// Note value of one beat (4 = quarter note)
    pub beat_unit: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            beat_amount: 4,
            beat_unit: 4,
        }
    }
}

/// Sample lengths derived from tempo, time signature and sample rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub samples_per_beat: usize,
    pub samples_per_bar: usize,
    pub samples_per_step: usize,
}

impl Timing {
    pub fn calculate(sample_rate: u32, tempo: f64, signature: TimeSignature, steps_per_bar: usize) -> Self {
        let quarter = sample_rate as f64 * 60.0 / tempo.max(1.0);
        let samples_per_beat = ((quarter * 4.0 / signature.beat_unit.max(1) as f64) as usize).max(1);
        let samples_per_bar = samples_per_beat * signature.beat_amount.max(1) as usize;
        Self {
            samples_per_beat,
            samples_per_bar,
            samples_per_step: (samples_per_bar / steps_per_bar.max(1)).max(1),
        }
    }
}

/// What happened while advancing one sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Advance {
    /// New step, when a step boundary was crossed
    pub step: Option<usize>,
    /// Marker position, when it was reached
    pub marker: Option<usize>,
}

/// Transport state
#[derive(Debug, Clone)]
pub struct Transport {
    sample_rate: u32,
    tempo: f64,
    queued_tempo: Option<(f64, TimeSignature)>,
    time_signature: TimeSignature,
    amount_of_bars: usize,
    steps_per_bar: usize,
    timing: Timing,

    position: usize,
    min_position: usize,
    max_position: usize,
    step: usize,
    min_step: usize,
    max_step: usize,
    marker: Option<usize>,
    playing: bool,
}

impl Transport {
    pub fn new(sample_rate: u32, tempo: f64, time_signature: TimeSignature, amount_of_bars: usize, steps_per_bar: usize) -> Self {
        let mut transport = Self {
            sample_rate,
            tempo,
            queued_tempo: None,
            time_signature,
            amount_of_bars: amount_of_bars.max(1),
            steps_per_bar: steps_per_bar.max(1),
            timing: Timing::calculate(sample_rate, tempo, time_signature, steps_per_bar),
            position: 0,
            min_position: 0,
            max_position: 0,
            step: 0,
            min_step: 0,
            max_step: 0,
            marker: None,
            playing: false,
        };
        transport.update_measures(transport.amount_of_bars, transport.steps_per_bar);
        transport
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn samples_per_bar(&self) -> usize {
        self.timing.samples_per_bar
    }

    pub fn samples_per_step(&self) -> usize {
        self.timing.samples_per_step
    }

    pub fn steps_per_bar(&self) -> usize {
        self.steps_per_bar
    }

    pub fn amount_of_bars(&self) -> usize {
        self.amount_of_bars
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn min_position(&self) -> usize {
        self.min_position
    }

    pub fn max_position(&self) -> usize {
        self.max_position
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn min_step(&self) -> usize {
        self.min_step
    }

    pub fn max_step(&self) -> usize {
        self.max_step
    }

    pub fn marker(&self) -> Option<usize> {
        self.marker
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    // ─────────────────────────────────────────────────────────────
    // Range and position
    // ─────────────────────────────────────────────────────────────

    /// Loop over whole bars starting at bar 0
    pub fn update_measures(&mut self, amount_of_bars: usize, steps_per_bar: usize) {
        self.amount_of_bars = amount_of_bars.max(1);
        self.steps_per_bar = steps_per_bar.max(1);
        self.timing = Timing::calculate(self.sample_rate, self.tempo, self.time_signature, self.steps_per_bar);
        let max = self.timing.samples_per_bar * self.amount_of_bars - 1;
        self.set_loop_range(0, max, self.steps_per_bar);
    }

    /// Set the loop range in samples (inclusive)
    ///
    /// `max` is raised to `min` when smaller; the position is clamped into
    /// the new range.
    pub fn set_loop_range(&mut self, min: usize, max: usize, steps_per_bar: usize) {
        if steps_per_bar.max(1) != self.steps_per_bar {
            self.steps_per_bar = steps_per_bar.max(1);
            self.timing = Timing::calculate(self.sample_rate, self.tempo, self.time_signature, self.steps_per_bar);
        }
        self.min_position = min;
        self.max_position = max.max(min);
        self.update_step_range();
        self.position = self.position.clamp(self.min_position, self.max_position);
    }

    fn update_step_range(&mut self) {
        let sps = self.timing.samples_per_step;
        self.min_step = self.min_position / sps;
        self.max_step = self.max_position / sps;
    }

    /// Jump to a sample position, clamped into the loop range
    pub fn set_position(&mut self, position: usize) {
        self.position = position.clamp(self.min_position, self.max_position);
        self.step = self.position / self.timing.samples_per_step;
    }

    /// Jump to the start of a step
    pub fn set_step_position(&mut self, step: usize) {
        self.set_position(step * self.timing.samples_per_step);
    }

    /// Position at which a marker notification fires (0 or `None` disables)
    pub fn set_marker(&mut self, marker: Option<usize>) {
        self.marker = marker.filter(|&m| m > 0);
    }

    /// Move one sample forward, wrapping past the loop end
    #[inline]
    pub fn advance(&mut self) -> Advance {
        let mut advance = Advance::default();
        if self.position % self.timing.samples_per_step == 0 {
            let mut step = self.position / self.timing.samples_per_step;
            if step > self.max_step {
                step = self.min_step;
            }
            self.step = step;
            advance.step = Some(step);
        }
        if self.marker == Some(self.position) {
            advance.marker = Some(self.position);
        }
        self.position += 1;
        if self.position > self.max_position {
            self.position = self.min_position;
        }
        advance
    }

    // ─────────────────────────────────────────────────────────────
    // Tempo
    // ─────────────────────────────────────────────────────────────

    /// Queue a tempo and time signature change for the next cycle boundary
    ///
    /// Both stay in effect unchanged until the change is applied.
    pub fn queue_tempo(&mut self, tempo: f64, time_signature: TimeSignature) {
        self.queued_tempo = Some((tempo, time_signature));
    }

    pub fn queued_tempo(&self) -> Option<(f64, TimeSignature)> {
        self.queued_tempo
    }

    /// Take the queued change, if it differs from the current tempo or signature
    pub fn take_queued_tempo(&mut self) -> Option<(f64, TimeSignature)> {
        self.queued_tempo
            .take()
            .filter(|&(tempo, signature)| tempo != self.tempo || signature != self.time_signature)
    }

    /// Apply a new tempo and time signature, returning the position ratio (old / new)
    ///
    /// The loop bounds, position and marker are rescaled so they stay on
    /// the same musical positions.
    pub fn apply_tempo(&mut self, tempo: f64, time_signature: TimeSignature) -> f64 {
        let tempo = tempo.max(1.0);
        let ratio = self.tempo / tempo;
        self.tempo = tempo;
        self.time_signature = time_signature;
        self.timing = Timing::calculate(self.sample_rate, tempo, time_signature, self.steps_per_bar);

        let scale = |value: usize| (value as f64 * ratio).round() as usize;
        let loop_length = self.max_position - self.min_position;
        self.min_position = scale(self.min_position);
        self.max_position = self.min_position + scale(loop_length);
        self.position = scale(self.position).clamp(self.min_position, self.max_position);
        self.marker = self.marker.map(scale).filter(|&m| m > 0);
        self.update_step_range();
        self.step = (self.position / self.timing.samples_per_step).clamp(self.min_step, self.max_step);
        ratio
    }

    /// Follow a sample rate change, keeping the musical positions
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate == self.sample_rate {
            return;
        }
        let ratio = sample_rate as f64 / self.sample_rate as f64;
        self.sample_rate = sample_rate;
        let tempo = self.tempo;
        // same rescale as a tempo change by the inverse ratio
        self.tempo = tempo * ratio;
        self.apply_tempo(tempo, self.time_signature);
    }

    /// Back to the loop start
    pub fn rewind(&mut self) {
        self.set_position(self.min_position);
    }
}

/// Lock-free transport readout for control threads
#[derive(Debug)]
pub struct TransportAtomics {
    pub position: AtomicUsize,
    pub step: AtomicUsize,
    /// `f64` bits of the current tempo
    pub tempo: AtomicU64,
    pub playing: AtomicBool,
}

impl TransportAtomics {
    pub fn new() -> Self {
        Self {
            position: AtomicUsize::new(0),
            step: AtomicUsize::new(0),
            tempo: AtomicU64::new(0f64.to_bits()),
            playing: AtomicBool::new(false),
        }
    }

    /// Publish the transport state (render thread, once per cycle)
    #[inline]
    pub fn publish(&self, transport: &Transport) {
        self.position.store(transport.position(), Ordering::Relaxed);
        self.step.store(transport.step(), Ordering::Relaxed);
        self.tempo.store(transport.tempo().to_bits(), Ordering::Relaxed);
        self.playing.store(transport.is_playing(), Ordering::Relaxed);
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn step(&self) -> usize {
        self.step.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tempo(&self) -> f64 {
        f64::from_bits(self.tempo.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }
}

impl Default for TransportAtomics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> Transport {
        Transport::new(44100, 120.0, TimeSignature::default(), 1, 16)
    }

    #[test]
    fn test_timing() {
        let t = transport();
        assert_eq!(t.timing().samples_per_beat, 22050);
        assert_eq!(t.samples_per_bar(), 88200);
        assert_eq!(t.samples_per_step(), 5512);
        assert_eq!(t.max_position(), 88199);

        let six_eight = Timing::calculate(44100, 120.0, TimeSignature { beat_amount: 6, beat_unit: 8 }, 12);
        assert_eq!(six_eight.samples_per_beat, 11025);
        assert_eq!(six_eight.samples_per_bar, 66150);
    }

    #[test]
    fn test_position_never_leaves_loop_range() {
        let mut t = transport();
        t.set_loop_range(10, 20, 16);
        t.set_position(15);
        let mut previous = t.position();
        for _ in 0..100 {
            t.advance();
            let position = t.position();
            assert!((10..=20).contains(&position));
            if previous == 20 {
                assert_eq!(position, 10);
            }
            previous = position;
        }
    }

    #[test]
    fn test_set_position_clamps() {
        let mut t = transport();
        t.set_loop_range(100, 200, 16);
        t.set_position(5);
        assert_eq!(t.position(), 100);
        t.set_position(5000);
        assert_eq!(t.position(), 200);
        t.set_loop_range(300, 250, 16);
        assert_eq!((t.min_position(), t.max_position(), t.position()), (300, 300, 300));
    }

    #[test]
    fn test_step_and_marker_notifications() {
        let mut t = Transport::new(1000, 60.0, TimeSignature::default(), 1, 4);
        // bar of 4000 samples, steps of 1000
        assert_eq!(t.samples_per_step(), 1000);
        t.set_marker(Some(1001));
        t.set_position(999);

        assert_eq!(t.advance(), Advance::default());
        assert_eq!(t.advance(), Advance { step: Some(1), marker: None });
        assert_eq!(t.advance(), Advance { step: None, marker: Some(1001) });
    }

    #[test]
    fn test_step_wraps_to_loop_start() {
        let mut t = Transport::new(1000, 60.0, TimeSignature::default(), 2, 4);
        t.set_loop_range(1000, 2999, 4);
        assert_eq!((t.min_step(), t.max_step()), (1, 2));
        t.set_position(2999);
        t.advance();
        assert_eq!(t.position(), 1000);
        assert_eq!(t.advance().step, Some(1));
    }

    #[test]
    fn test_tempo_change_is_reversible() {
        let mut t = Transport::new(44100, 120.0, TimeSignature::default(), 4, 16);
        t.set_loop_range(88200, 352799, 16);
        t.set_position(123457);
        t.set_marker(Some(200001));
        let before = (t.min_position(), t.max_position(), t.position(), t.marker());

        let ratio = t.apply_tempo(97.0, t.time_signature());
        assert!((ratio - 120.0 / 97.0).abs() < 1e-12);
        t.apply_tempo(120.0, t.time_signature());

        let after = (t.min_position(), t.max_position(), t.position(), t.marker());
        assert!(before.0.abs_diff(after.0) <= 1);
        assert!(before.1.abs_diff(after.1) <= 1);
        assert!(before.2.abs_diff(after.2) <= 1);
        assert!(before.3.unwrap().abs_diff(after.3.unwrap()) <= 1);
        assert_eq!(t.samples_per_bar(), 88200);
    }

    #[test]
    fn test_queued_tempo() {
        let mut t = transport();
        t.queue_tempo(120.0, TimeSignature::default());
        assert_eq!(t.take_queued_tempo(), None);
        t.queue_tempo(140.0, TimeSignature::default());
        assert_eq!(t.take_queued_tempo(), Some((140.0, TimeSignature::default())));
        assert_eq!(t.queued_tempo(), None);
    }

    #[test]
    fn test_queued_signature_waits_for_the_tempo() {
        let mut t = transport();
        let waltz = TimeSignature {
            beat_amount: 3,
            beat_unit: 4,
        };
        let bar = t.samples_per_bar();
        t.queue_tempo(120.0, waltz);
        assert_eq!(t.time_signature(), TimeSignature::default());
        assert_eq!(t.samples_per_bar(), bar);

        // same tempo, new signature: still a change
        let (tempo, signature) = t.take_queued_tempo().unwrap();
        assert_eq!(signature, waltz);
        assert_eq!(t.apply_tempo(tempo, signature), 1.0);
        assert_eq!(t.time_signature(), waltz);
        assert_eq!(t.samples_per_bar(), bar / 4 * 3);
    }

    #[test]
    fn test_atomics_publish() {
        let mut t = transport();
        t.set_position(4096);
        t.set_playing(true);
        let atomics = TransportAtomics::new();
        atomics.publish(&t);
        assert_eq!(atomics.position(), 4096);
        assert_eq!(atomics.tempo(), 120.0);
        assert!(atomics.is_playing());
    }
}
