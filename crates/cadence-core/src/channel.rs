//! Per-instrument mix bus
//!
//! An [`AudioChannel`] belongs to exactly one instrument. Each cycle the
//! engine silences its output buffer, mixes the instrument's events into
//! it (or replays the cache), runs the channel's processing chain and
//! finally mixes the result into master (or a group) with pan applied.
//!
//! ## Caching
//!
//! Synthesis and cacheable processors are expensive but deterministic.
//! A channel can capture one full range of its output and replay it:
//!
//! ```text
//!   can_cache(true, ..)        buffer full
//!   Idle ─────────────▶ Caching ──────────▶ Cached
//!     ▲                    │                  │
//!     └────────────────────┴──────────────────┘
//!        can_cache(false, ..) / size change / clear_cache()
//! ```
//!
//! While `Caching` the channel still mixes every event and additionally
//! copies the output into the cache. Once `Cached` per-event mixing and
//! cacheable processors are skipped for transport offsets inside the
//! cached range.

use std::f32::consts::FRAC_PI_2;

use crate::buffer::AudioBuffer;
use crate::effect::ProcessingChain;
use crate::types::{next_chain_id, to_linear, to_log, ChainId, GroupId, InstrumentId};

/// Cache state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Idle,
    Caching,
    Cached,
}

/// How a non-center pan is turned into left/right gains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanLaw {
    /// `left = sin(θ)`, `right = cos(θ)` with `θ = (pan + 1) / 2 · π/2`;
    /// each output also receives the opposite input at the opposite gain.
    ///
    /// Both outputs end up with the same `l·sin + r·cos` sum, so a panned
    /// channel is folded to mono at a pan-dependent level rather than moved
    /// in the stereo image. Pick [`PanLaw::EqualPower`] for stereo placement.
    ///
    /// Assumes two channels; buffers with more channels only have their
    /// first two channels panned.
    #[default]
    CrossBleed,
    /// Equal-power law with per-source gains: the side panned towards
    /// keeps its own signal at unity and receives the other side's signal
    /// at `sin`, while the other side is attenuated by `cos`.
    EqualPower,
}

/// Left/right gains derived from the pan position
#[derive(Debug, Clone, Copy, PartialEq)]
struct PanGains {
    left: f32,
    right: f32,
    // equal-power gains: (into left, into right) for each source side
    left_source: (f32, f32),
    right_source: (f32, f32),
}

impl PanGains {
    fn compute(pan: f32) -> Self {
        let theta = ((pan + 1.0) / 2.0) * FRAC_PI_2;
        let (left_source, right_source) = if pan < 0.0 {
            let a = pan.abs() * FRAC_PI_2;
            ((1.0, 0.0), (a.sin(), a.cos()))
        } else {
            let a = pan * FRAC_PI_2;
            ((a.cos(), a.sin()), (0.0, 1.0))
        };
        Self {
            left: theta.sin(),
            right: theta.cos(),
            left_source,
            right_source,
        }
    }
}

/// Mix bus of one instrument
pub struct AudioChannel {
    id: InstrumentId,
    /// Logarithmically scaled volume
    volume: f32,
    pan: f32,
    pan_law: PanLaw,
    gains: PanGains,
    /// Muted channels are neither collected nor mixed
    pub muted: bool,
    /// Only channel 0 of the content carries signal
    pub is_mono_source: bool,
    /// End of the channel's own loop range, if it loops independently
    max_buffer_position: Option<usize>,
    /// Group this channel is summed into instead of master
    group: Option<GroupId>,

    output: AudioBuffer,
    scratch: AudioBuffer,
    chain: ProcessingChain,

    cache: Option<AudioBuffer>,
    cache_state: CacheState,
    cache_size: usize,
    cache_start: usize,
    cache_end: usize,
    cache_read_pointer: usize,
    cache_write_pointer: usize,

    /// Sequenced events (instrument slots) to mix this cycle
    pub(crate) collected: Vec<usize>,
    /// Live events (instrument slots) to mix this cycle
    pub(crate) collected_live: Vec<usize>,
}

impl AudioChannel {
    pub fn new(id: InstrumentId, amount_of_channels: usize, buffer_size: usize) -> Self {
        Self::with_chain(id, next_chain_id(), amount_of_channels, buffer_size)
    }

    /// Channel whose chain carries a reserved id (device input)
    pub(crate) fn with_chain(id: InstrumentId, chain: ChainId, amount_of_channels: usize, buffer_size: usize) -> Self {
        Self {
            id,
            volume: to_log(1.0),
            pan: 0.0,
            pan_law: PanLaw::default(),
            gains: PanGains::compute(0.0),
            muted: false,
            is_mono_source: false,
            max_buffer_position: None,
            group: None,
            output: AudioBuffer::new(amount_of_channels, buffer_size),
            scratch: AudioBuffer::new(amount_of_channels, buffer_size),
            chain: ProcessingChain::new(chain),
            cache: None,
            cache_state: CacheState::Idle,
            cache_size: 0,
            cache_start: 0,
            cache_end: 0,
            cache_read_pointer: 0,
            cache_write_pointer: 0,
            collected: Vec::with_capacity(64),
            collected_live: Vec::with_capacity(16),
        }
    }

    pub fn id(&self) -> InstrumentId {
        self.id
    }

    // ─────────────────────────────────────────────────────────────
    // Volume / pan
    // ─────────────────────────────────────────────────────────────

    /// Set volume from a linear 0.0-1.0 value
    pub fn set_volume(&mut self, linear: f32) {
        self.volume = to_log(linear);
    }

    /// Volume as linear 0.0-1.0 value
    pub fn volume(&self) -> f32 {
        to_linear(self.volume)
    }

    /// Volume on the mixing (logarithmic) scale
    pub fn log_volume(&self) -> f32 {
        self.volume
    }

    /// Set pan position, -1.0 (left) to 1.0 (right)
    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
        self.gains = PanGains::compute(self.pan);
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn set_pan_law(&mut self, law: PanLaw) {
        self.pan_law = law;
    }

    pub fn pan_law(&self) -> PanLaw {
        self.pan_law
    }

    /// Left and right gains of the cross-bleed law
    pub fn pan_gains(&self) -> (f32, f32) {
        (self.gains.left, self.gains.right)
    }

    // ─────────────────────────────────────────────────────────────
    // Routing
    // ─────────────────────────────────────────────────────────────

    pub fn max_buffer_position(&self) -> Option<usize> {
        self.max_buffer_position
    }

    /// Give the channel its own loop range `[0, max]`, or follow the
    /// transport loop with `None`
    pub fn set_max_buffer_position(&mut self, max: Option<usize>) {
        self.max_buffer_position = max.filter(|&m| m > 0);
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    pub(crate) fn set_group(&mut self, group: Option<GroupId>) {
        self.group = group;
    }

    pub fn chain(&self) -> &ProcessingChain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut ProcessingChain {
        &mut self.chain
    }

    // ─────────────────────────────────────────────────────────────
    // Buffers
    // ─────────────────────────────────────────────────────────────

    pub fn output(&self) -> &AudioBuffer {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut AudioBuffer {
        &mut self.output
    }

    /// Split borrow of the output buffer, the bus scratch buffer and the chain
    pub(crate) fn processing_parts(&mut self) -> (&mut AudioBuffer, &mut AudioBuffer, &mut ProcessingChain) {
        (&mut self.output, &mut self.scratch, &mut self.chain)
    }

    /// Reallocate for a new engine buffer size
    ///
    /// A completed cache no longer matches and is discarded.
    pub fn set_buffer_size(&mut self, amount_of_channels: usize, buffer_size: usize) {
        self.output = AudioBuffer::new(amount_of_channels, buffer_size);
        self.scratch = AudioBuffer::new(amount_of_channels, buffer_size);
        if self.cache_state != CacheState::Idle {
            self.clear_cache();
            self.cache_state = CacheState::Caching;
        }
    }

    /// Size and silence the output for this cycle's frame count
    pub fn prepare(&mut self, frame_count: usize) {
        self.output.resize(frame_count);
        self.output.silence();
        self.scratch.resize(frame_count);
    }

    /// Forget the events collected for the previous cycle
    pub fn reset(&mut self) {
        self.collected.clear();
        self.collected_live.clear();
    }

    pub fn has_live_events(&self) -> bool {
        !self.collected_live.is_empty()
    }

    /// Mix the output into `destination`, applying pan
    pub fn mix_into(&self, destination: &mut AudioBuffer, gain: f32) {
        if gain == 0.0 {
            return;
        }
        if self.pan == 0.0 || destination.amount_of_channels() < 2 || self.output.amount_of_channels() < 2 {
            destination.merge(&self.output, 0, 0, gain);
            return;
        }

        let frames = destination.size().min(self.output.size());
        let (Some(src_l), Some(src_r)) = (self.output.channel(0), self.output.channel(1)) else {
            return;
        };

        let (dst_l, dst_r) = stereo_pair(destination);

        match self.pan_law {
            PanLaw::CrossBleed => {
                let (lg, rg) = (self.gains.left * gain, self.gains.right * gain);
                for i in 0..frames {
                    let (l, r) = (src_l[i], src_r[i]);
                    dst_l[i] += l * lg + r * rg;
                    dst_r[i] += r * rg + l * lg;
                }
            }
            PanLaw::EqualPower => {
                let (ls, rs) = (self.gains.left_source, self.gains.right_source);
                for i in 0..frames {
                    let (l, r) = (src_l[i] * gain, src_r[i] * gain);
                    dst_l[i] += l * ls.0 + r * rs.0;
                    dst_r[i] += l * ls.1 + r * rs.1;
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Cache
    // ─────────────────────────────────────────────────────────────

    pub fn cache_state(&self) -> CacheState {
        self.cache_state
    }

    pub fn has_cache(&self) -> bool {
        self.cache_state == CacheState::Cached
    }

    pub fn is_caching(&self) -> bool {
        self.cache_state == CacheState::Caching
    }

    /// Range of transport offsets the cache covers
    pub fn cache_range(&self) -> (usize, usize) {
        (self.cache_start, self.cache_end)
    }

    /// Enable or disable caching for `size` samples covering
    /// `[start_offset, end_offset]` of the transport
    pub fn can_cache(&mut self, enable: bool, size: usize, start_offset: usize, end_offset: usize) {
        if !enable || size != self.cache_size {
            self.cache = None;
            self.cache_size = 0;
            self.cache_read_pointer = 0;
            self.cache_write_pointer = 0;
            self.cache_state = CacheState::Idle;
        } else if start_offset != self.cache_start {
            self.clear_cache();
        }
        self.cache_start = start_offset;
        self.cache_end = end_offset.max(start_offset);

        if !enable || size == 0 {
            return;
        }
        if self.cache.is_none() {
            // loopable: a cycle straddling the range end reads on from the start
            self.cache = Some(AudioBuffer::new(self.output.amount_of_channels(), size).with_loopable(true));
            self.cache_size = size;
        }
        if self.cache_state == CacheState::Idle {
            self.cache_write_pointer = 0;
            self.cache_state = CacheState::Caching;
        }
    }

    /// Drop captured content; caching restarts from the range start
    pub fn clear_cache(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.silence();
        }
        self.cache_read_pointer = 0;
        self.cache_write_pointer = 0;
        if self.cache_state == CacheState::Cached {
            self.cache_state = CacheState::Caching;
        }
    }

    /// Copy the current output into the cache
    ///
    /// Writing starts when the transport reaches the range start and must
    /// continue contiguously; the cache is complete once full.
    pub fn write_cache(&mut self, transport_offset: usize) {
        if self.cache_state != CacheState::Caching {
            return;
        }
        let Some(cache) = self.cache.as_mut() else {
            return;
        };
        if transport_offset < self.cache_start || transport_offset > self.cache_end {
            return;
        }
        if transport_offset - self.cache_start != self.cache_write_pointer {
            // missed the start of the range (seek, late enable); wait for it
            if transport_offset != self.cache_start {
                return;
            }
            cache.silence();
            self.cache_write_pointer = 0;
        }

        let written = cache.merge(&self.output, 0, self.cache_write_pointer, 1.0);
        self.cache_write_pointer += written;

        if self.cache_write_pointer >= cache.size() {
            self.cache_state = CacheState::Cached;
            self.cache_write_pointer = 0;
            self.cache_read_pointer = 0;
            log::debug!("{}: cache complete ({} samples)", self.id, cache.size());
        }
    }

    /// Merge cached content for `transport_offset` into the output
    pub fn read_cached_buffer(&mut self, transport_offset: usize) {
        if self.cache_state != CacheState::Cached {
            return;
        }
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if transport_offset < self.cache_start || transport_offset > self.cache_end {
            return;
        }
        self.cache_read_pointer = transport_offset - self.cache_start;
        self.output.merge(cache, self.cache_read_pointer, 0, 1.0);
        self.cache_read_pointer += self.output.size();
    }
}

/// Mutable left/right channels of a destination with at least two channels
fn stereo_pair(buffer: &mut AudioBuffer) -> (&mut [f32], &mut [f32]) {
    let mut channels = buffer.channels_mut();
    match (channels.next(), channels.next()) {
        (Some(l), Some(r)) => (l, r),
        _ => (&mut [], &mut []),
    }
}

impl std::fmt::Debug for AudioChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioChannel")
            .field("id", &self.id)
            .field("volume", &self.volume())
            .field("pan", &self.pan)
            .field("muted", &self.muted)
            .field("cache_state", &self.cache_state)
            .finish()
    }
}
