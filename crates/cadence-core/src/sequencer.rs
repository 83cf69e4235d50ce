//! Event collection
//!
//! Before mixing, the render loop asks an [`EventCollector`] which events
//! sound in the current transport window. The collector fills each
//! channel's `collected` / `collected_live` slot lists, which the
//! instrument then mixes.
//!
//! A cycle that crosses the loop end is collected twice: once for the tail
//! `[position, loop_max]` (the primary pass, which also resets the lists)
//! and once for the wrapped head starting at `loop_min`. Events overlapping
//! both windows are listed once.

use crate::event::AudioEvent;
use crate::instrument::Instrument;

/// One collection query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectRequest {
    /// First transport position of the window
    pub position: usize,
    /// Frames in the window
    pub frames: usize,
    pub loop_min: usize,
    pub loop_max: usize,
    /// Also list live events
    pub include_live: bool,
    /// Clear previously collected lists and drop deletable events
    pub flush: bool,
    /// First query of the cycle; channels with their own range are only
    /// collected here
    pub primary: bool,
}

impl CollectRequest {
    /// Primary query for a cycle starting at `position`
    pub fn primary(position: usize, frames: usize, loop_min: usize, loop_max: usize) -> Self {
        Self {
            position,
            frames,
            loop_min,
            loop_max,
            include_live: true,
            flush: true,
            primary: true,
        }
    }

    /// Follow-up query for the head of the loop after a wrap
    pub fn wrapped(frames: usize, loop_min: usize, loop_max: usize) -> Self {
        Self {
            position: loop_min,
            frames,
            loop_min,
            loop_max,
            include_live: false,
            flush: false,
            primary: false,
        }
    }
}

/// Outcome of a collection query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectResult {
    /// Channels with at least one collected event
    pub active_channels: usize,
    /// The window runs past the loop end
    pub loop_started: bool,
}

/// Finds the events to mix for a transport window
pub trait EventCollector: Send {
    /// Fill the channels' collected lists for `request`
    ///
    /// Events removed along the way are handed to `retire`.
    fn collect(
        &mut self,
        instruments: &mut [Box<Instrument>],
        request: &CollectRequest,
        retire: &mut dyn FnMut(Box<AudioEvent>),
    ) -> CollectResult;
}

/// Collector walking each instrument's measure buckets
///
/// Events spanning several measures appear in several buckets; a cycle
/// stamp on the event keeps it from being listed twice.
#[derive(Debug, Default)]
pub struct MeasureCollector {
    cycle: u64,
}

impl MeasureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect_range(&self, instrument: &mut Instrument, first: usize, last: usize) {
        let cycle = self.cycle;
        let mut collected = std::mem::take(&mut instrument.channel.collected);
        instrument.for_each_overlapping(first, last, |slot, event| {
            if event.collected_cycle == cycle || !event.is_enabled() || event.is_deletable() {
                return;
            }
            event.collected_cycle = cycle;
            collected.push(slot);
        });
        instrument.channel.collected = collected;
    }
}

impl EventCollector for MeasureCollector {
    fn collect(
        &mut self,
        instruments: &mut [Box<Instrument>],
        request: &CollectRequest,
        retire: &mut dyn FnMut(Box<AudioEvent>),
    ) -> CollectResult {
        if request.flush {
            self.cycle = self.cycle.wrapping_add(1);
        }
        let frames = request.frames.max(1);
        let mut active_channels = 0;

        for instrument in instruments.iter_mut() {
            if request.flush {
                instrument.channel.reset();
                if instrument.has_deletable() {
                    instrument.remove_deletable(retire);
                }
            }
            if instrument.channel.muted {
                continue;
            }

            match instrument.channel.max_buffer_position() {
                Some(range_max) => {
                    // own range: both sides of its wrap in the primary pass
                    if request.primary {
                        let start = request.position % (range_max + 1);
                        let last = start + frames - 1;
                        if frames > range_max {
                            self.collect_range(instrument, 0, range_max);
                        } else if last > range_max {
                            self.collect_range(instrument, start, range_max);
                            self.collect_range(instrument, 0, last - range_max - 1);
                        } else {
                            self.collect_range(instrument, start, last);
                        }
                    }
                }
                None => {
                    if request.position <= request.loop_max {
                        let last = (request.position + frames - 1).min(request.loop_max);
                        self.collect_range(instrument, request.position, last);
                    }
                }
            }

            if request.include_live {
                let mut live = std::mem::take(&mut instrument.channel.collected_live);
                live.clear();
                live.extend_from_slice(instrument.live_slots());
                instrument.channel.collected_live = live;
            }

            if !instrument.channel.collected.is_empty() || instrument.channel.has_live_events() {
                active_channels += 1;
            }
        }

        CollectResult {
            active_channels,
            loop_started: request.position + frames - 1 > request.loop_max,
        }
    }
}
