//! Instrument registry
//!
//! An [`Instrument`] owns its [`AudioChannel`], its events and the index
//! used to find the events a transport window overlaps:
//!
//! ```text
//!   slots:     [ ev0 ][ ev1 ][  -  ][ ev3 ]      (event storage, stable indices)
//!   sequenced: 0, 1, 3                           (flat list)
//!   live:      -
//!   measures:  bar 0 ─▶ [0]
//!              bar 1 ─▶ [0, 1]                   (ev0 spans bars 0..=1)
//!              bar 2 ─▶ [3]
//! ```
//!
//! Every sequenced event is listed in each measure bucket its
//! `start..=end` range overlaps, and nowhere else. Buckets grow on demand
//! and are rebuilt wholesale after a tempo change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::buffer::AudioBuffer;
use crate::channel::AudioChannel;
use crate::event::{AudioEvent, EventState, MixWindow, SynthMix};
use crate::synth::SynthSettings;
use crate::types::{EventId, InstrumentId};

static NEXT_INSTRUMENT_ID: AtomicU32 = AtomicU32::new(1);

/// Event slots reserved up front so most additions do not allocate
const INITIAL_EVENT_CAPACITY: usize = 64;

/// One instrument: a channel plus the events played through it
pub struct Instrument {
    id: InstrumentId,
    pub channel: AudioChannel,
    /// Present for synth instruments
    synth: Option<SynthSettings>,
    /// Synthesis scratch buffer
    temp: AudioBuffer,

    slots: Vec<Option<Box<AudioEvent>>>,
    free_slots: Vec<usize>,
    lookup: HashMap<EventId, usize>,
    sequenced: Vec<usize>,
    live: Vec<usize>,
    measures: Vec<Vec<usize>>,

    samples_per_bar: usize,
    /// Set while events are being repositioned
    frozen: bool,
}

impl Instrument {
    /// Sample instrument
    pub fn new(amount_of_channels: usize, buffer_size: usize, samples_per_bar: usize) -> Self {
        let id = InstrumentId(NEXT_INSTRUMENT_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            id,
            channel: AudioChannel::new(id, amount_of_channels, buffer_size),
            synth: None,
            temp: AudioBuffer::new(amount_of_channels, buffer_size),
            slots: Vec::with_capacity(INITIAL_EVENT_CAPACITY),
            free_slots: Vec::with_capacity(INITIAL_EVENT_CAPACITY),
            lookup: HashMap::with_capacity(INITIAL_EVENT_CAPACITY),
            sequenced: Vec::with_capacity(INITIAL_EVENT_CAPACITY),
            live: Vec::with_capacity(INITIAL_EVENT_CAPACITY),
            measures: Vec::new(),
            samples_per_bar: samples_per_bar.max(1),
            frozen: false,
        }
    }

    /// Synth instrument rendering its events with `settings`
    pub fn synth(settings: SynthSettings, amount_of_channels: usize, buffer_size: usize, samples_per_bar: usize) -> Self {
        let mut instrument = Self::new(amount_of_channels, buffer_size, samples_per_bar);
        instrument.channel.is_mono_source = true;
        instrument.synth = Some(settings);
        instrument
    }

    pub fn id(&self) -> InstrumentId {
        self.id
    }

    pub fn synth_settings(&self) -> Option<&SynthSettings> {
        self.synth.as_ref()
    }

    /// Replace the synth settings and recalculate every event's envelope
    pub fn set_synth_settings(&mut self, settings: SynthSettings) {
        self.synth = Some(settings);
        self.invalidate_all();
        // release tails move event ends across bar lines
        self.rebuild_index();
    }

    pub fn samples_per_bar(&self) -> usize {
        self.samples_per_bar
    }

    /// Reallocate buffers for a new engine buffer size
    pub fn set_buffer_size(&mut self, amount_of_channels: usize, buffer_size: usize) {
        self.channel.set_buffer_size(amount_of_channels, buffer_size);
        self.temp = AudioBuffer::new(amount_of_channels, buffer_size);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    // ─────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────

    /// Register an event
    ///
    /// Live events start playing immediately. The event is handed back
    /// while the registry is frozen for repositioning.
    pub fn add_event(&mut self, mut event: Box<AudioEvent>) -> Result<EventId, Box<AudioEvent>> {
        if self.frozen {
            return Err(event);
        }
        let id = event.id();
        if self.lookup.contains_key(&id) {
            return Err(event);
        }
        event.set_instrument(Some(self.id));
        event.invalidate_properties(self.synth.as_ref(), self.samples_per_bar);
        let live = event.is_live();
        if live {
            event.play();
        }

        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(event);
                slot
            }
            None => {
                self.slots.push(Some(event));
                self.slots.len() - 1
            }
        };
        self.lookup.insert(id, slot);
        if live {
            self.live.push(slot);
        } else {
            self.sequenced.push(slot);
            self.index_slot(slot);
        }
        Ok(id)
    }

    /// Unregister an event, stopping it if it was playing live
    pub fn remove_event(&mut self, id: EventId) -> Option<Box<AudioEvent>> {
        if self.frozen {
            return None;
        }
        self.take_slot(id).map(|mut event| {
            if event.is_live() {
                event.stop(self.samples_per_bar);
            }
            event.set_instrument(None);
            event
        })
    }

    fn take_slot(&mut self, id: EventId) -> Option<Box<AudioEvent>> {
        let slot = self.lookup.remove(&id)?;
        self.unindex_slot(slot);
        self.sequenced.retain(|&s| s != slot);
        self.live.retain(|&s| s != slot);
        self.channel.collected.retain(|&s| s != slot);
        self.channel.collected_live.retain(|&s| s != slot);
        self.free_slots.push(slot);
        self.slots.get_mut(slot).and_then(Option::take)
    }

    pub fn has_event(&self, id: EventId) -> bool {
        self.lookup.contains_key(&id)
    }

    pub fn event(&self, id: EventId) -> Option<&AudioEvent> {
        let slot = *self.lookup.get(&id)?;
        self.slots.get(slot)?.as_deref()
    }

    /// Sequenced events in insertion order
    pub fn sequenced_events(&self) -> impl Iterator<Item = &AudioEvent> {
        self.sequenced
            .iter()
            .filter_map(|&slot| self.slots.get(slot).and_then(|e| e.as_deref()))
    }

    pub fn live_events(&self) -> impl Iterator<Item = &AudioEvent> {
        self.live
            .iter()
            .filter_map(|&slot| self.slots.get(slot).and_then(|e| e.as_deref()))
    }

    pub fn event_count(&self) -> usize {
        self.lookup.len()
    }

    /// Mutate an event and re-index it
    ///
    /// Returns false for unknown ids.
    pub fn update_event(&mut self, id: EventId, update: impl FnOnce(&mut AudioEvent)) -> bool {
        let Some(&slot) = self.lookup.get(&id) else {
            return false;
        };
        let sequenced = self.sequenced.contains(&slot);
        if sequenced {
            self.unindex_slot(slot);
        }
        if let Some(event) = self.slots.get_mut(slot).and_then(|e| e.as_deref_mut()) {
            update(event);
            event.invalidate_properties(self.synth.as_ref(), self.samples_per_bar);
        }
        if sequenced {
            self.index_slot(slot);
        }
        true
    }

    /// Release an event (key-up for live events)
    pub fn stop_event(&mut self, id: EventId) -> bool {
        let bar = self.samples_per_bar;
        self.update_event(id, |event| event.stop(bar))
    }

    /// Remove every event, handing each to `retire`
    pub fn clear_events(&mut self, retire: &mut dyn FnMut(Box<AudioEvent>)) {
        for slot in self.slots.iter_mut() {
            if let Some(mut event) = slot.take() {
                event.set_instrument(None);
                retire(event);
            }
        }
        self.slots.clear();
        self.free_slots.clear();
        self.lookup.clear();
        self.sequenced.clear();
        self.live.clear();
        for bucket in &mut self.measures {
            bucket.clear();
        }
        self.channel.reset();
    }

    /// Remove events flagged deletable, handing each to `retire`
    pub fn remove_deletable(&mut self, retire: &mut dyn FnMut(Box<AudioEvent>)) {
        let deletable: Vec<EventId> = self
            .slots
            .iter()
            .flatten()
            .filter(|event| event.is_deletable())
            .map(|event| event.id())
            .collect();
        for id in deletable {
            if let Some(mut event) = self.take_slot(id) {
                event.set_instrument(None);
                retire(event);
            }
        }
    }

    /// True if any registered event is flagged deletable
    pub fn has_deletable(&self) -> bool {
        self.slots.iter().flatten().any(|event| event.is_deletable())
    }

    // ─────────────────────────────────────────────────────────────
    // Measure index
    // ─────────────────────────────────────────────────────────────

    fn measure_range(&self, event: &AudioEvent) -> (usize, usize) {
        (event.start() / self.samples_per_bar, event.end() / self.samples_per_bar)
    }

    fn index_slot(&mut self, slot: usize) {
        let Some(event) = self.slots.get(slot).and_then(|e| e.as_deref()) else {
            return;
        };
        let (first, last) = self.measure_range(event);
        if self.measures.len() <= last {
            self.measures.resize_with(last + 1, Vec::new);
        }
        for bucket in &mut self.measures[first..=last] {
            if !bucket.contains(&slot) {
                bucket.push(slot);
            }
        }
    }

    fn unindex_slot(&mut self, slot: usize) {
        for bucket in &mut self.measures {
            bucket.retain(|&s| s != slot);
        }
    }

    /// Rebuild every bucket from the flat list
    pub fn rebuild_index(&mut self) {
        for bucket in &mut self.measures {
            bucket.clear();
        }
        for i in 0..self.sequenced.len() {
            let slot = self.sequenced[i];
            self.index_slot(slot);
        }
    }

    pub fn measure_count(&self) -> usize {
        self.measures.len()
    }

    /// Events listed in measure bucket `measure`
    pub fn events_in_measure(&self, measure: usize) -> impl Iterator<Item = &AudioEvent> {
        self.measures
            .get(measure)
            .into_iter()
            .flatten()
            .filter_map(|&slot| self.slots.get(slot).and_then(|e| e.as_deref()))
    }

    /// Slots of sequenced events overlapping `[first, last]`
    ///
    /// Events spanning several buckets are reported once per bucket; the
    /// collector dedupes by cycle stamp.
    pub(crate) fn for_each_overlapping(&mut self, first: usize, last: usize, mut visit: impl FnMut(usize, &mut AudioEvent)) {
        let from = first / self.samples_per_bar;
        let to = (last / self.samples_per_bar).min(self.measures.len().saturating_sub(1));
        if self.measures.is_empty() || from > to {
            return;
        }
        for bucket in &self.measures[from..=to] {
            for &slot in bucket {
                let Some(event) = self.slots.get_mut(slot).and_then(|e| e.as_deref_mut()) else {
                    continue;
                };
                if event.start() <= last && event.end() >= first {
                    visit(slot, event);
                }
            }
        }
    }

    /// Live event slots
    pub(crate) fn live_slots(&self) -> &[usize] {
        &self.live
    }

    // ─────────────────────────────────────────────────────────────
    // Tempo
    // ─────────────────────────────────────────────────────────────

    /// Reposition every sequenced event for a tempo change
    ///
    /// `ratio` is old tempo / new tempo. Additions and removals are refused
    /// while repositioning; the index is rebuilt afterwards.
    pub fn update_events(&mut self, ratio: f64, samples_per_bar: usize) {
        self.frozen = true;
        self.samples_per_bar = samples_per_bar.max(1);
        for slot in self.sequenced.iter().copied() {
            if let Some(event) = self.slots.get_mut(slot).and_then(|e| e.as_deref_mut()) {
                event.reposition_to_tempo_change(ratio);
            }
        }
        self.invalidate_all();
        self.rebuild_index();
        self.frozen = false;
    }

    fn invalidate_all(&mut self) {
        let synth = self.synth.as_ref();
        for event in self.slots.iter_mut().flatten() {
            event.invalidate_properties(synth, self.samples_per_bar);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Mixing
    // ─────────────────────────────────────────────────────────────

    /// Mix the collected sequenced events for `window` into the channel
    pub fn mix_events(&mut self, window: &MixWindow) {
        let bar = self.samples_per_bar;
        let collected = std::mem::take(&mut self.channel.collected);
        for &slot in &collected {
            let Some(event) = self.slots.get_mut(slot).and_then(|e| e.as_deref_mut()) else {
                continue;
            };
            event.lock();
            let synth = self.synth.as_ref().map(|settings| SynthMix {
                settings,
                temp: &mut self.temp,
            });
            event.mix_buffer(self.channel.output_mut(), window, synth);
            event.unlock(self.synth.as_ref(), bar);
        }
        self.channel.collected = collected;
    }

    /// Mix the collected live events into the channel
    pub fn mix_live_events(&mut self) {
        let bar = self.samples_per_bar;
        let collected = std::mem::take(&mut self.channel.collected_live);
        for &slot in &collected {
            let Some(event) = self.slots.get_mut(slot).and_then(|e| e.as_deref_mut()) else {
                continue;
            };
            if event.state() == EventState::Removed {
                continue;
            }
            event.lock();
            let synth = self.synth.as_ref().map(|settings| SynthMix {
                settings,
                temp: &mut self.temp,
            });
            event.mix_live(self.channel.output_mut(), synth);
            event.unlock(self.synth.as_ref(), bar);
        }
        self.channel.collected_live = collected;
    }
}

impl std::fmt::Debug for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("id", &self.id)
            .field("synth", &self.synth.is_some())
            .field("sequenced", &self.sequenced.len())
            .field("live", &self.live.len())
            .field("measures", &self.measures.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BAR: usize = 100;

    fn sample_event(start: usize, length: usize) -> Box<AudioEvent> {
        Box::new(AudioEvent::sample(AudioBuffer::new(1, length), start))
    }

    fn bucket_ids(instrument: &Instrument, measure: usize) -> Vec<EventId> {
        instrument.events_in_measure(measure).map(|e| e.id()).collect()
    }

    #[test]
    fn test_event_is_listed_in_every_overlapped_measure() {
        let mut instrument = Instrument::new(2, 16, BAR);
        let id = instrument.add_event(sample_event(150, 200)).unwrap();

        // 150..=349 overlaps bars 1, 2 and 3
        assert_eq!(instrument.measure_count(), 4);
        assert!(bucket_ids(&instrument, 0).is_empty());
        for measure in 1..=3 {
            assert_eq!(bucket_ids(&instrument, measure), vec![id]);
        }
    }

    #[test]
    fn test_remove_clears_buckets_and_reuses_slot() {
        let mut instrument = Instrument::new(2, 16, BAR);
        let first = instrument.add_event(sample_event(0, 50)).unwrap();
        let removed = instrument.remove_event(first).unwrap();
        assert_eq!(removed.id(), first);
        assert_eq!(removed.instrument(), None);
        assert!(bucket_ids(&instrument, 0).is_empty());
        assert!(instrument.remove_event(first).is_none());

        let second = instrument.add_event(sample_event(0, 50)).unwrap();
        assert_eq!(instrument.event_count(), 1);
        assert_eq!(instrument.slots.len(), 1);
        assert_eq!(bucket_ids(&instrument, 0), vec![second]);
    }

    #[test]
    fn test_update_event_reindexes() {
        let mut instrument = Instrument::new(2, 16, BAR);
        let id = instrument.add_event(sample_event(0, 50)).unwrap();
        assert!(instrument.update_event(id, |event| event.set_start(250)));
        assert!(bucket_ids(&instrument, 0).is_empty());
        assert_eq!(bucket_ids(&instrument, 2), vec![id]);
        assert!(!instrument.update_event(EventId(u32::MAX), |_| {}));
    }

    #[test]
    fn test_update_events_rescales_and_rebuilds() {
        let mut instrument = Instrument::new(2, 16, BAR);
        let id = instrument.add_event(sample_event(300, 10)).unwrap();

        // tempo doubled: ratio 0.5, bar halves
        instrument.update_events(0.5, BAR / 2);
        let event = instrument.event(id).unwrap();
        assert_eq!((event.start(), event.length()), (150, 10));
        assert_eq!(bucket_ids(&instrument, 3), vec![id]);
        assert!(!instrument.is_frozen());

        instrument.update_events(2.0, BAR);
        let event = instrument.event(id).unwrap();
        assert_eq!(event.start(), 300);
        assert_eq!(bucket_ids(&instrument, 3), vec![id]);
    }

    #[test]
    fn test_frozen_registry_refuses_additions() {
        let mut instrument = Instrument::new(2, 16, BAR);
        instrument.frozen = true;
        assert!(instrument.add_event(sample_event(0, 10)).is_err());
    }

    #[test]
    fn test_live_event_starts_playing_and_is_removed_when_deletable() {
        let mut instrument = Instrument::new(1, 4, BAR);
        let id = instrument
            .add_event(Box::new(AudioEvent::live_sample(AudioBuffer::new(1, 8))))
            .unwrap();
        assert_eq!(instrument.event(id).unwrap().state(), EventState::Playing);
        assert_eq!(instrument.live_events().count(), 1);

        instrument.stop_event(id);
        assert!(instrument.has_deletable());

        let mut retired = Vec::new();
        instrument.remove_deletable(&mut |event| retired.push(event.id()));
        assert_eq!(retired, vec![id]);
        assert_eq!(instrument.event_count(), 0);
    }

    #[test]
    fn test_overlap_query_filters_bucket_neighbors() {
        let mut instrument = Instrument::new(2, 16, BAR);
        let early = instrument.add_event(sample_event(0, 10)).unwrap();
        let late = instrument.add_event(sample_event(60, 10)).unwrap();

        let mut seen = Vec::new();
        instrument.for_each_overlapping(50, 80, |_, event| seen.push(event.id()));
        assert_eq!(seen, vec![late]);
        assert_ne!(early, late);
    }

    #[test]
    fn test_synth_events_get_instrument_envelope() {
        let mut settings = SynthSettings::new(1000);
        settings.adsr.set_durations(0, 0, 0, 20);
        let mut instrument = Instrument::synth(settings, 2, 16, BAR);
        let id = instrument
            .add_event(Box::new(AudioEvent::synth(440.0, 0, 50, 1000)))
            .unwrap();
        assert_eq!(instrument.event(id).unwrap().end(), 69);
        assert!(instrument.channel.is_mono_source);
    }

    #[test]
    fn test_synth_settings_change_reindexes_release_tail() {
        let settings = SynthSettings::new(1000);
        let mut instrument = Instrument::synth(settings.clone(), 2, 16, BAR);
        let id = instrument
            .add_event(Box::new(AudioEvent::synth(440.0, 0, 50, 1000)))
            .unwrap();
        assert!(bucket_ids(&instrument, 1).is_empty());

        let mut longer = settings.clone();
        longer.adsr.set_durations(0, 0, 0, 100);
        instrument.set_synth_settings(longer);
        assert_eq!(instrument.event(id).unwrap().end(), 149);
        assert_eq!(bucket_ids(&instrument, 1), vec![id]);

        let mut seen = Vec::new();
        instrument.for_each_overlapping(120, 140, |_, event| seen.push(event.id()));
        assert_eq!(seen, vec![id]);

        // shrinking the tail drops the stale bucket
        instrument.set_synth_settings(settings);
        assert_eq!(instrument.event(id).unwrap().end(), 49);
        assert!(bucket_ids(&instrument, 1).is_empty());
    }
}
