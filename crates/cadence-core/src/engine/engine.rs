//! Render loop
//!
//! [`AudioEngine`] owns everything the render thread touches. One call to
//! [`AudioEngine::render`] produces one cycle of interleaved output:
//!
//! ```text
//!  commands ─▶ collect ─▶ input ─▶ channels ─▶ groups ─▶ master chain
//!                                                            │
//!  tempo ◀─ recorder ◀─ driver ◀─ transport advance ◀─ interleave + clamp
//! ```
//!
//! Channel volume is divided by the number of instruments to leave
//! headroom. Live events are mixed even when the channel is silent, and
//! channels routed into a group reach master only through that group.

use std::collections::HashSet;
use std::sync::Arc;

use super::command::{retire, ChainTarget, EngineCommand, Retired};
use crate::audio::AudioDriver;
use crate::buffer::AudioBuffer;
use crate::channel::AudioChannel;
use crate::context::EngineContext;
use crate::effect::{run_processor, ProcessingChain};
use crate::event::{AudioEvent, MixWindow};
use crate::group::ChannelGroup;
use crate::instrument::Instrument;
use crate::notify::{Notification, NotificationSink};
use crate::record::RecordingSink;
use crate::sequencer::{CollectRequest, EventCollector, MeasureCollector};
use crate::transport::{TimeSignature, TransportAtomics};
use crate::types::{cap_sample_safe, EventId, GroupId, InstrumentId, Sample, INPUT_CHAIN, MASTER_CHAIN};

/// Instruments reserved up front so adding one rarely allocates
const INSTRUMENT_CAPACITY: usize = 64;

/// Groups reserved up front
const GROUP_CAPACITY: usize = 16;

/// Transport state saved while a bounce borrows the loop range
#[derive(Debug, Clone, Copy)]
struct BounceRange {
    start: usize,
    previous_min: usize,
    previous_max: usize,
}

/// The render-thread half of the engine
pub struct AudioEngine {
    context: EngineContext,
    instruments: Vec<Box<Instrument>>,
    groups: Vec<Box<ChannelGroup>>,
    /// Channels allowed to cache their output
    cache_allowed: HashSet<InstrumentId>,

    master: AudioBuffer,
    master_scratch: AudioBuffer,
    master_chain: ProcessingChain,
    input: AudioChannel,
    input_interleaved: Vec<Sample>,
    output: Vec<Sample>,
    output_frames: usize,

    collector: Box<dyn EventCollector>,
    driver: Option<Box<dyn AudioDriver>>,
    recorder: Option<Box<dyn RecordingSink>>,
    frames_since_update: usize,
    bounce: Option<BounceRange>,

    commands: rtrb::Consumer<EngineCommand>,
    retired: rtrb::Producer<Retired>,
    notifier: Box<dyn NotificationSink>,
    atomics: Arc<TransportAtomics>,
}

impl AudioEngine {
    pub fn new(
        context: EngineContext,
        commands: rtrb::Consumer<EngineCommand>,
        retired: rtrb::Producer<Retired>,
        notifier: Box<dyn NotificationSink>,
    ) -> Self {
        let channels = context.output_channels;
        let size = context.buffer_size;
        let atomics = Arc::new(TransportAtomics::new());
        atomics.publish(&context.transport);

        let mut input = AudioChannel::with_chain(InstrumentId(0), INPUT_CHAIN, channels, size);
        input.is_mono_source = context.input_channels == 1;

        Self {
            instruments: Vec::with_capacity(INSTRUMENT_CAPACITY),
            groups: Vec::with_capacity(GROUP_CAPACITY),
            cache_allowed: HashSet::new(),
            master: AudioBuffer::new(channels, size),
            master_scratch: AudioBuffer::new(channels, size),
            master_chain: ProcessingChain::new(MASTER_CHAIN),
            input,
            input_interleaved: vec![0.0; size * context.input_channels],
            output: vec![0.0; size * channels],
            output_frames: 0,
            collector: Box::new(MeasureCollector::new()),
            driver: None,
            recorder: None,
            frames_since_update: 0,
            bounce: None,
            commands,
            retired,
            notifier,
            atomics,
            context,
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Lock-free transport readout for other threads
    pub fn atomics(&self) -> Arc<TransportAtomics> {
        Arc::clone(&self.atomics)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.iter().map(|i| i.as_ref())
    }

    pub fn instrument(&self, id: InstrumentId) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.id() == id).map(|i| i.as_ref())
    }

    fn instrument_mut(&mut self, id: InstrumentId) -> Option<&mut Instrument> {
        self.instruments.iter_mut().find(|i| i.id() == id).map(|i| i.as_mut())
    }

    pub fn group(&self, id: GroupId) -> Option<&ChannelGroup> {
        self.groups.iter().find(|g| g.id() == id).map(|g| g.as_ref())
    }

    pub fn master_chain(&self) -> &ProcessingChain {
        &self.master_chain
    }

    /// Interleaved output of the last rendered cycle
    pub fn last_output(&self) -> &[Sample] {
        &self.output[..self.output_frames * self.context.output_channels]
    }

    pub fn is_bouncing(&self) -> bool {
        self.bounce.is_some()
    }

    pub fn has_recorder(&self) -> bool {
        self.recorder.is_some()
    }

    /// Replace the event collector
    pub fn set_collector(&mut self, collector: Box<dyn EventCollector>) {
        self.collector = collector;
    }

    pub fn set_driver(&mut self, driver: Box<dyn AudioDriver>) {
        self.driver = Some(driver);
    }

    pub fn take_driver(&mut self) -> Option<Box<dyn AudioDriver>> {
        self.driver.take()
    }

    // ─────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────

    /// Apply every queued command
    pub fn process_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            self.apply(command);
        }
    }

    /// Apply a single command
    pub fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Play => self.context.transport.set_playing(true),
            EngineCommand::Stop => self.context.transport.set_playing(false),
            EngineCommand::SetPosition(position) => self.context.transport.set_position(position),
            EngineCommand::SetStepPosition(step) => self.context.transport.set_step_position(step),
            EngineCommand::SetLoopRange { min, max, steps_per_bar } => {
                self.context.transport.set_loop_range(min, max, steps_per_bar);
                self.update_caches();
            }
            EngineCommand::UpdateMeasures {
                amount_of_bars,
                steps_per_bar,
            } => {
                self.context.transport.update_measures(amount_of_bars, steps_per_bar);
                self.update_caches();
            }
            EngineCommand::SetTempo { tempo, time_signature } => {
                self.context.transport.queue_tempo(tempo, time_signature);
            }
            EngineCommand::SetTempoNow { tempo, time_signature } => {
                self.context.transport.queue_tempo(tempo, time_signature);
                self.apply_queued_tempo();
            }
            EngineCommand::SetMarker(marker) => self.context.transport.set_marker(marker),
            EngineCommand::SetMasterVolume(volume) => self.context.set_master_volume(volume),

            EngineCommand::AddInstrument(instrument) => self.add_instrument(instrument),
            EngineCommand::RemoveInstrument(id) => self.remove_instrument(id),
            EngineCommand::SetSynthSettings { instrument, settings } => match self.instrument_mut(instrument) {
                Some(target) => {
                    target.set_synth_settings(*settings);
                    target.channel.clear_cache();
                }
                None => log::warn!("SetSynthSettings: unknown {}", instrument),
            },

            EngineCommand::AddEvent { instrument, event } => self.add_event(instrument, event),
            EngineCommand::RemoveEvent { instrument, event } => {
                let removed = self.instrument_mut(instrument).and_then(|target| {
                    target.channel.clear_cache();
                    target.remove_event(event)
                });
                match removed {
                    Some(removed) => retire(&mut self.retired, Retired::Event(removed)),
                    None => log::debug!("RemoveEvent: {} not found on {}", event, instrument),
                }
            }
            EngineCommand::StopEvent { instrument, event } => {
                if !self.instrument_mut(instrument).is_some_and(|target| target.stop_event(event)) {
                    log::debug!("StopEvent: {} not found on {}", event, instrument);
                }
            }
            EngineCommand::MoveEvent {
                instrument,
                event,
                start,
                length,
            } => self.update_event(instrument, event, |e| {
                e.set_start(start);
                if let Some(length) = length {
                    e.set_length(length);
                }
            }),
            EngineCommand::PositionEvent {
                instrument,
                event,
                start_measure,
                subdivisions,
                offset,
            } => {
                let bar = self.context.transport.samples_per_bar();
                self.update_event(instrument, event, |e| e.position_in_grid(start_measure, subdivisions, offset, bar));
            }
            EngineCommand::SetEventVolume { instrument, event, volume } => {
                self.update_event(instrument, event, |e| e.set_volume(volume));
            }
            EngineCommand::SetEventEnabled { instrument, event, enabled } => {
                self.update_event(instrument, event, |e| e.set_enabled(enabled));
            }

            EngineCommand::SetChannelVolume { instrument, volume } => {
                self.with_channel(instrument, |channel| channel.set_volume(volume));
            }
            EngineCommand::SetChannelPan { instrument, pan } => {
                self.with_channel(instrument, |channel| channel.set_pan(pan));
            }
            EngineCommand::SetChannelPanLaw { instrument, law } => {
                self.with_channel(instrument, |channel| channel.set_pan_law(law));
            }
            EngineCommand::SetChannelMute { instrument, muted } => {
                self.with_channel(instrument, |channel| channel.muted = muted);
            }
            EngineCommand::SetChannelRange { instrument, max } => {
                self.with_channel(instrument, |channel| channel.set_max_buffer_position(max));
                self.update_caches();
            }
            EngineCommand::SetChannelCache { instrument, enabled } => {
                if enabled {
                    self.cache_allowed.insert(instrument);
                } else {
                    self.cache_allowed.remove(&instrument);
                }
                self.update_caches();
            }

            EngineCommand::AddProcessor { target, mut processor } => {
                processor.set_tempo(self.context.transport.tempo(), self.context.sample_rate);
                let rejected = match self.chain_mut(target) {
                    Some(chain) => chain.add(processor).err(),
                    None => Some(processor),
                };
                match rejected {
                    Some(processor) => {
                        log::warn!("AddProcessor: {} rejected by {:?}", processor.info().name, target);
                        retire(&mut self.retired, Retired::Processor(processor));
                    }
                    None => self.invalidate_cache(target),
                }
            }
            EngineCommand::RemoveProcessor { target, processor } => {
                match self.chain_mut(target).and_then(|chain| chain.remove(processor)) {
                    Some(removed) => {
                        retire(&mut self.retired, Retired::Processor(removed));
                        self.invalidate_cache(target);
                    }
                    None => log::debug!("RemoveProcessor: {} not on {:?}", processor, target),
                }
            }
            EngineCommand::SetProcessorParam {
                target,
                processor,
                param,
                value,
            } => {
                match self.chain_mut(target).and_then(|chain| chain.get_mut(processor)) {
                    Some(p) => p.set_param(param, value),
                    None => log::debug!("SetProcessorParam: {} not on {:?}", processor, target),
                }
                self.invalidate_cache(target);
            }
            EngineCommand::SetProcessorBypass {
                target,
                processor,
                bypass,
            } => {
                if let Some(p) = self.chain_mut(target).and_then(|chain| chain.get_mut(processor)) {
                    p.set_bypass(bypass);
                }
                self.invalidate_cache(target);
            }

            EngineCommand::AddGroup(group) => {
                if self.groups.iter().any(|g| g.id() == group.id()) {
                    retire(&mut self.retired, Retired::Group(group));
                } else {
                    self.groups.push(group);
                }
            }
            EngineCommand::RemoveGroup(id) => {
                if let Some(index) = self.groups.iter().position(|g| g.id() == id) {
                    let group = self.groups.swap_remove(index);
                    for instrument in self.instruments.iter_mut() {
                        if instrument.channel.group() == Some(id) {
                            instrument.channel.set_group(None);
                        }
                    }
                    retire(&mut self.retired, Retired::Group(group));
                }
            }
            EngineCommand::AssignToGroup { instrument, group } => self.assign_to_group(instrument, group),
            EngineCommand::SetGroupVolume { group, volume } => {
                match self.groups.iter_mut().find(|g| g.id() == group) {
                    Some(target) => target.set_volume(volume),
                    None => log::warn!("SetGroupVolume: unknown {}", group),
                }
            }

            EngineCommand::SetRecorder(recorder) => {
                if let Some(previous) = self.recorder.take() {
                    retire(&mut self.retired, Retired::Recorder(previous));
                }
                self.recorder = recorder;
                self.frames_since_update = 0;
            }
            EngineCommand::StartBounce { start, end } => self.start_bounce(start, end),

            EngineCommand::SetChannelCaching(enabled) => {
                self.context.channel_caching = enabled;
                self.update_caches();
            }
            EngineCommand::SetRecordDeviceInput(enabled) => self.context.record_device_input = enabled,
            EngineCommand::Reset => self.reset(),
        }
    }

    fn add_instrument(&mut self, mut instrument: Box<Instrument>) {
        if self.instruments.iter().any(|i| i.id() == instrument.id()) {
            log::warn!("AddInstrument: {} already registered", instrument.id());
            retire(&mut self.retired, Retired::Instrument(instrument));
            return;
        }
        let bar = self.context.transport.samples_per_bar();
        if instrument.samples_per_bar() != bar {
            instrument.update_events(1.0, bar);
        }
        instrument.channel.set_group(None);
        self.instruments.push(instrument);
        self.update_caches();
    }

    fn remove_instrument(&mut self, id: InstrumentId) {
        let Some(index) = self.instruments.iter().position(|i| i.id() == id) else {
            log::warn!("RemoveInstrument: unknown {}", id);
            return;
        };
        let instrument = self.instruments.remove(index);
        for group in self.groups.iter_mut() {
            group.remove_member(id);
        }
        self.cache_allowed.remove(&id);
        retire(&mut self.retired, Retired::Instrument(instrument));
    }

    fn add_event(&mut self, instrument: InstrumentId, event: Box<AudioEvent>) {
        let result = match self.instrument_mut(instrument) {
            Some(target) => {
                target.channel.clear_cache();
                target.add_event(event).map(|_| ())
            }
            None => {
                log::warn!("AddEvent: unknown {}", instrument);
                Err(event)
            }
        };
        if let Err(event) = result {
            retire(&mut self.retired, Retired::Event(event));
        }
    }

    fn update_event(&mut self, instrument: InstrumentId, event: EventId, update: impl FnOnce(&mut AudioEvent)) {
        let Some(target) = self.instrument_mut(instrument) else {
            log::warn!("Event update: unknown {}", instrument);
            return;
        };
        if target.update_event(event, update) {
            target.channel.clear_cache();
        } else {
            log::debug!("Event update: {} not found on {}", event, instrument);
        }
    }

    fn with_channel(&mut self, instrument: InstrumentId, update: impl FnOnce(&mut AudioChannel)) {
        match self.instrument_mut(instrument) {
            Some(target) => update(&mut target.channel),
            None => log::warn!("Channel update: unknown {}", instrument),
        }
    }

    fn chain_mut(&mut self, target: ChainTarget) -> Option<&mut ProcessingChain> {
        match target {
            ChainTarget::Master => Some(&mut self.master_chain),
            ChainTarget::Input => Some(self.input.chain_mut()),
            ChainTarget::Channel(id) => self.instrument_mut(id).map(|i| i.channel.chain_mut()),
            ChainTarget::Group(id) => self.groups.iter_mut().find(|g| g.id() == id).map(|g| g.chain_mut()),
        }
    }

    fn invalidate_cache(&mut self, target: ChainTarget) {
        if let ChainTarget::Channel(id) = target {
            if let Some(instrument) = self.instrument_mut(id) {
                instrument.channel.clear_cache();
            }
        }
    }

    fn assign_to_group(&mut self, instrument: InstrumentId, group: Option<GroupId>) {
        if let Some(id) = group {
            if !self.groups.iter().any(|g| g.id() == id) {
                log::warn!("AssignToGroup: unknown {}", id);
                return;
            }
        }
        let Some(index) = self.instruments.iter().position(|i| i.id() == instrument) else {
            log::warn!("AssignToGroup: unknown {}", instrument);
            return;
        };
        for g in self.groups.iter_mut() {
            g.remove_member(instrument);
            if Some(g.id()) == group {
                g.add_member(instrument);
            }
        }
        self.instruments[index].channel.set_group(group);
    }

    /// Size and place every allowed channel cache on its loop range
    fn update_caches(&mut self) {
        let transport = &self.context.transport;
        let (min, max) = (transport.min_position(), transport.max_position());
        for instrument in self.instruments.iter_mut() {
            let allowed = self.context.channel_caching && self.cache_allowed.contains(&instrument.id());
            let (start, end) = match instrument.channel.max_buffer_position() {
                Some(range_max) => (0, range_max),
                None => (min, max),
            };
            instrument.channel.can_cache(allowed, end - start + 1, start, end);
        }
    }

    fn start_bounce(&mut self, start: usize, end: usize) {
        if self.recorder.is_none() {
            log::warn!("Bounce started without a recorder; output is discarded");
        }
        let transport = &mut self.context.transport;
        let steps = transport.steps_per_bar();
        self.bounce = Some(BounceRange {
            start,
            previous_min: transport.min_position(),
            previous_max: transport.max_position(),
        });
        transport.set_loop_range(start, end.max(start), steps);
        transport.set_position(start);
        transport.set_playing(true);
        self.frames_since_update = 0;
        self.update_caches();
        log::info!("Bounce started: [{}, {}]", start, end.max(start));
    }

    fn finish_bounce(&mut self, range: BounceRange) {
        let transport = &mut self.context.transport;
        let steps = transport.steps_per_bar();
        transport.set_playing(false);
        transport.set_loop_range(range.previous_min, range.previous_max, steps);
        transport.set_position(range.start);
        if let Some(recorder) = self.recorder.take() {
            retire(&mut self.retired, Retired::Recorder(recorder));
        }
        self.update_caches();
        log::info!("Bounce rendered");
    }

    /// Clear every instrument's events and rewind the transport
    pub fn reset(&mut self) {
        let retired = &mut self.retired;
        for instrument in self.instruments.iter_mut() {
            instrument.clear_events(&mut |event: Box<AudioEvent>| retire(retired, Retired::Event(event)));
            instrument.channel.clear_cache();
        }
        self.context.transport.rewind();
        self.atomics.publish(&self.context.transport);
        log::info!("Engine reset");
    }

    // ─────────────────────────────────────────────────────────────
    // Tempo
    // ─────────────────────────────────────────────────────────────

    fn apply_queued_tempo(&mut self) {
        let Some((tempo, time_signature)) = self.context.transport.take_queued_tempo() else {
            return;
        };
        let ratio = self.context.transport.apply_tempo(tempo, time_signature);
        let tempo = self.context.transport.tempo();
        let sample_rate = self.context.sample_rate;
        let timing = self.context.transport.timing();

        for instrument in self.instruments.iter_mut() {
            instrument.update_events(ratio, timing.samples_per_bar);
            instrument.channel.chain_mut().set_tempo(tempo, sample_rate);
            instrument.channel.clear_cache();
        }
        for group in self.groups.iter_mut() {
            group.chain_mut().set_tempo(tempo, sample_rate);
        }
        self.input.chain_mut().set_tempo(tempo, sample_rate);
        self.master_chain.set_tempo(tempo, sample_rate);
        self.update_caches();

        let TimeSignature { beat_amount, beat_unit } = self.context.transport.time_signature();
        log::info!("Tempo updated to {:.2} BPM ({}/{})", tempo, beat_amount, beat_unit);
        self.notifier.notify(Notification::TempoUpdated {
            tempo,
            beat_amount,
            beat_unit,
            samples_per_beat: timing.samples_per_beat,
            samples_per_bar: timing.samples_per_bar,
            samples_per_step: timing.samples_per_step,
        });
    }

    // ─────────────────────────────────────────────────────────────
    // Render
    // ─────────────────────────────────────────────────────────────

    /// Render one cycle of `frames` frames
    ///
    /// Returns false once a bounce has rendered its full range.
    pub fn render(&mut self, frames: usize) -> bool {
        self.process_commands();

        let output_channels = self.context.output_channels;
        self.master.resize(frames);
        self.master.silence();
        self.master_scratch.resize(frames);
        if self.output.len() < frames * output_channels {
            self.output.resize(frames * output_channels, 0.0);
        }
        self.output_frames = frames;
        if frames == 0 {
            return true;
        }

        let transport = &self.context.transport;
        let playing = transport.is_playing();
        let position = transport.position();
        let (loop_min, loop_max) = (transport.min_position(), transport.max_position());

        // collect, twice when the loop wraps inside this cycle
        let retired = &mut self.retired;
        let mut retire_event = |event: Box<AudioEvent>| retire(retired, Retired::Event(event));
        let request = CollectRequest::primary(position, frames, loop_min, loop_max);
        self.collector.collect(&mut self.instruments, &request, &mut retire_event);

        let loop_offset = (loop_max + 1).saturating_sub(position);
        let loop_started = playing && loop_offset < frames;
        if loop_started {
            let request = CollectRequest::wrapped(frames - loop_offset, loop_min, loop_max);
            self.collector.collect(&mut self.instruments, &request, &mut retire_event);
        }

        self.mix_device_input(frames);

        for group in self.groups.iter_mut() {
            group.prepare(frames);
        }
        let window = MixWindow {
            position,
            loop_min,
            loop_max,
            loop_started,
            loop_offset,
            channel_range: None,
        };
        let instrument_count = self.instruments.len() as f32;
        let caching = self.context.channel_caching && playing;

        for instrument in self.instruments.iter_mut() {
            instrument.channel.prepare(frames);
            if instrument.channel.muted {
                continue;
            }
            let channel_range = instrument.channel.max_buffer_position();
            let offset = channel_range.map_or(position, |max| position % (max + 1));
            let mut channel_volume = instrument.channel.log_volume() / instrument_count;
            let is_cached = instrument.channel.has_cache();
            let has_live = instrument.channel.has_live_events();
            let mut must_cache = caching && instrument.channel.is_caching();
            if must_cache && has_live {
                // never bake live playing into the cache
                instrument.channel.clear_cache();
                must_cache = false;
            }

            if playing && channel_volume > 0.0 && !instrument.channel.collected.is_empty() {
                if is_cached {
                    instrument.channel.read_cached_buffer(offset);
                } else {
                    instrument.mix_events(&MixWindow { channel_range, ..window });
                }
            }
            if has_live {
                instrument.mix_live_events();
            }

            process_channel(&mut instrument.channel, is_cached, must_cache, offset);

            if has_live && channel_volume == 0.0 {
                channel_volume = 1.0;
            }
            let group = instrument
                .channel
                .group()
                .and_then(|id| self.groups.iter_mut().find(|g| g.id() == id));
            match group {
                Some(group) => group.accumulate(&instrument.channel, channel_volume),
                None => instrument.channel.mix_into(&mut self.master, channel_volume),
            }
        }

        for group in self.groups.iter_mut() {
            group.process();
            group.mix_into(&mut self.master);
        }

        self.master_chain.run(&mut self.master, &mut self.master_scratch, false);

        // interleave with master volume and a hard clamp
        let volume = self.context.log_master_volume();
        for c in 0..output_channels {
            let Some(source) = self.master.channel(c) else {
                continue;
            };
            for (i, &sample) in source.iter().enumerate().take(frames) {
                self.output[i * output_channels + c] = cap_sample_safe(sample * volume);
            }
        }

        if playing {
            for i in 0..frames {
                let advance = self.context.transport.advance();
                if let Some(step) = advance.step {
                    self.notifier.notify(Notification::StepPosition { step, buffer_offset: i });
                }
                if let Some(position) = advance.marker {
                    self.notifier.notify(Notification::MarkerReached {
                        position,
                        buffer_offset: i,
                    });
                }
            }
        }

        let interleaved = &self.output[..frames * output_channels];
        if self.bounce.is_none() {
            if let Some(driver) = self.driver.as_mut() {
                driver.write_output(interleaved, frames);
            }
        }

        let mut keep_rendering = true;
        if let Some(recorder) = self.recorder.as_mut() {
            if playing {
                let bounce_done = self.bounce.is_some_and(|range| loop_started || self.context.transport.position() == range.start);
                let recorded = if bounce_done { loop_offset.min(frames) } else { frames };
                recorder.append_buffer(&interleaved[..recorded * output_channels], recorded);

                self.frames_since_update += recorded;
                if self.frames_since_update >= self.context.sample_rate as usize {
                    self.frames_since_update = 0;
                    self.notifier.notify(Notification::RecordingUpdate {
                        frames: recorder.frames(),
                    });
                }
            }
        }
        if let Some(range) = self.bounce {
            if loop_started || self.context.transport.position() == range.start {
                self.bounce = None;
                self.finish_bounce(range);
                keep_rendering = false;
            }
        }

        self.apply_queued_tempo();
        self.atomics.publish(&self.context.transport);
        keep_rendering
    }

    /// Read the driver input into the input channel and mix it into master
    fn mix_device_input(&mut self, frames: usize) {
        let input_channels = self.context.input_channels;
        if !self.context.record_device_input || input_channels == 0 {
            return;
        }
        let Some(driver) = self.driver.as_mut() else {
            return;
        };
        let wanted = frames * input_channels;
        if self.input_interleaved.len() < wanted {
            self.input_interleaved.resize(wanted, 0.0);
        }
        let read = driver.read_input(&mut self.input_interleaved[..wanted], frames).min(frames);

        self.input.prepare(frames);
        let output = self.input.output_mut();
        for c in 0..output.amount_of_channels() {
            // mono input is spread over every output channel
            let source = c.min(input_channels - 1);
            let Some(channel) = output.channel_mut(c) else {
                continue;
            };
            for (i, sample) in channel.iter_mut().enumerate().take(read) {
                *sample = cap_sample_safe(self.input_interleaved[i * input_channels + source]);
            }
        }

        let mono = self.input.is_mono_source;
        let (output, scratch, chain) = self.input.processing_parts();
        chain.run(output, scratch, mono);
        if !self.input.muted {
            self.input.mix_into(&mut self.master, self.input.log_volume());
        }
    }
}

/// Run a channel's chain, writing or honoring its cache
///
/// The leading run of cacheable processors is what the cache captures: the
/// cache is written right before the first processor that cannot be
/// cached, and a cached channel skips that leading run.
fn process_channel(channel: &mut AudioChannel, is_cached: bool, mut must_cache: bool, offset: usize) {
    let mono = channel.is_mono_source;
    let count = channel.chain().len();
    let mut in_cached_run = true;

    for index in 0..count {
        let cacheable = match channel.chain_mut().active_processors().get(index) {
            Some(processor) => processor.is_cacheable(),
            None => break,
        };
        if in_cached_run && !cacheable {
            in_cached_run = false;
            if must_cache {
                channel.write_cache(offset);
                must_cache = false;
            }
        }
        if in_cached_run && is_cached {
            continue;
        }
        let (output, scratch, chain) = channel.processing_parts();
        if let Some(processor) = chain.active_processors().get_mut(index) {
            if !processor.is_bypassed() {
                run_processor(processor.as_mut(), output, scratch, mono);
            }
        }
    }

    if must_cache {
        channel.write_cache(offset);
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("instruments", &self.instruments.len())
            .field("groups", &self.groups.len())
            .field("transport", &self.context.transport)
            .field("bouncing", &self.bounce.is_some())
            .finish()
    }
}
