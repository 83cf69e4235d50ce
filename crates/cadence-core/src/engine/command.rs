//! Lock-free command queue into the render thread
//!
//! Control threads never touch engine state directly. They push
//! [`EngineCommand`]s into an `rtrb` SPSC ring, and the render thread
//! drains the ring once at the start of every cycle, so state only ever
//! changes between cycles.
//!
//! ```text
//! ┌────────────────┐ EngineCommand ┌──────────────┐ drain per cycle ┌───────────────┐
//! │ Control Thread │──────────────►│ Command Ring │────────────────►│ Render Thread │
//! └────────────────┘               └──────────────┘                 └───────┬───────┘
//!         ▲                                                                 │
//!         │                      ┌──────────────┐  removed objects          │
//!         └──────── drop ────────│ Retired Ring │◄──────────────────────────┘
//!                                └──────────────┘
//! ```
//!
//! Anything the render thread removes (events, processors, instruments,
//! a finished recorder) travels back through the [`Retired`] ring and is
//! dropped on the control side.

use crate::channel::PanLaw;
use crate::effect::Processor;
use crate::event::AudioEvent;
use crate::group::ChannelGroup;
use crate::instrument::Instrument;
use crate::record::RecordingSink;
use crate::synth::SynthSettings;
use crate::transport::TimeSignature;
use crate::types::{EventId, GroupId, InstrumentId, ProcessorId};

/// Which processing chain a processor command addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainTarget {
    Master,
    /// Device input channel
    Input,
    Channel(InstrumentId),
    Group(GroupId),
}

/// Commands sent from control threads to the render thread
///
/// Large payloads are boxed to keep the enum small in the ring.
pub enum EngineCommand {
    // ─────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────
    Play,
    Stop,
    /// Jump to a sample position (clamped into the loop)
    SetPosition(usize),
    /// Jump to the start of a step
    SetStepPosition(usize),
    /// Loop `[min, max]` in samples
    SetLoopRange { min: usize, max: usize, steps_per_bar: usize },
    /// Loop over `amount_of_bars` whole bars
    UpdateMeasures { amount_of_bars: usize, steps_per_bar: usize },
    /// Apply a tempo at the end of the current cycle
    SetTempo { tempo: f64, time_signature: TimeSignature },
    /// Apply a tempo before rendering the next cycle
    SetTempoNow { tempo: f64, time_signature: TimeSignature },
    /// Position that triggers a marker notification (`None` disables)
    SetMarker(Option<usize>),
    SetMasterVolume(f32),

    // ─────────────────────────────────────────────────────────────
    // Instruments
    // ─────────────────────────────────────────────────────────────
    AddInstrument(Box<Instrument>),
    RemoveInstrument(InstrumentId),
    SetSynthSettings { instrument: InstrumentId, settings: Box<SynthSettings> },

    // ─────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────
    /// Register an event (live events start sounding right away)
    AddEvent { instrument: InstrumentId, event: Box<AudioEvent> },
    RemoveEvent { instrument: InstrumentId, event: EventId },
    /// Release an event (key-up for live events)
    StopEvent { instrument: InstrumentId, event: EventId },
    /// Move an event; `length` keeps the current length when `None`
    MoveEvent {
        instrument: InstrumentId,
        event: EventId,
        start: usize,
        length: Option<usize>,
    },
    /// Place an event on the musical grid
    PositionEvent {
        instrument: InstrumentId,
        event: EventId,
        start_measure: usize,
        subdivisions: usize,
        offset: usize,
    },
    SetEventVolume { instrument: InstrumentId, event: EventId, volume: f32 },
    SetEventEnabled { instrument: InstrumentId, event: EventId, enabled: bool },

    // ─────────────────────────────────────────────────────────────
    // Channels
    // ─────────────────────────────────────────────────────────────
    SetChannelVolume { instrument: InstrumentId, volume: f32 },
    SetChannelPan { instrument: InstrumentId, pan: f32 },
    SetChannelPanLaw { instrument: InstrumentId, law: PanLaw },
    SetChannelMute { instrument: InstrumentId, muted: bool },
    /// Give a channel its own loop range `[0, max]` (`None` follows the transport)
    SetChannelRange { instrument: InstrumentId, max: Option<usize> },
    /// Allow or forbid caching a channel's output
    SetChannelCache { instrument: InstrumentId, enabled: bool },

    // ─────────────────────────────────────────────────────────────
    // Processors
    // ─────────────────────────────────────────────────────────────
    AddProcessor { target: ChainTarget, processor: Box<dyn Processor> },
    RemoveProcessor { target: ChainTarget, processor: ProcessorId },
    SetProcessorParam {
        target: ChainTarget,
        processor: ProcessorId,
        param: usize,
        value: f32,
    },
    SetProcessorBypass { target: ChainTarget, processor: ProcessorId, bypass: bool },

    // ─────────────────────────────────────────────────────────────
    // Groups
    // ─────────────────────────────────────────────────────────────
    AddGroup(Box<ChannelGroup>),
    RemoveGroup(GroupId),
    /// Route a channel into a group (`None` back to master)
    AssignToGroup { instrument: InstrumentId, group: Option<GroupId> },
    SetGroupVolume { group: GroupId, volume: f32 },

    // ─────────────────────────────────────────────────────────────
    // Recording / bounce
    // ─────────────────────────────────────────────────────────────
    /// Install (`Some`) or detach (`None`) the recording sink
    SetRecorder(Option<Box<dyn RecordingSink>>),
    /// Render `[start, end]` offline into the installed recorder
    StartBounce { start: usize, end: usize },

    // ─────────────────────────────────────────────────────────────
    // Global
    // ─────────────────────────────────────────────────────────────
    SetChannelCaching(bool),
    SetRecordDeviceInput(bool),
    /// Clear every instrument's events and rewind the transport
    Reset,
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Play => "Play",
            Self::Stop => "Stop",
            Self::SetPosition(_) => "SetPosition",
            Self::SetStepPosition(_) => "SetStepPosition",
            Self::SetLoopRange { .. } => "SetLoopRange",
            Self::UpdateMeasures { .. } => "UpdateMeasures",
            Self::SetTempo { .. } => "SetTempo",
            Self::SetTempoNow { .. } => "SetTempoNow",
            Self::SetMarker(_) => "SetMarker",
            Self::SetMasterVolume(_) => "SetMasterVolume",
            Self::AddInstrument(_) => "AddInstrument",
            Self::RemoveInstrument(_) => "RemoveInstrument",
            Self::SetSynthSettings { .. } => "SetSynthSettings",
            Self::AddEvent { .. } => "AddEvent",
            Self::RemoveEvent { .. } => "RemoveEvent",
            Self::StopEvent { .. } => "StopEvent",
            Self::MoveEvent { .. } => "MoveEvent",
            Self::PositionEvent { .. } => "PositionEvent",
            Self::SetEventVolume { .. } => "SetEventVolume",
            Self::SetEventEnabled { .. } => "SetEventEnabled",
            Self::SetChannelVolume { .. } => "SetChannelVolume",
            Self::SetChannelPan { .. } => "SetChannelPan",
            Self::SetChannelPanLaw { .. } => "SetChannelPanLaw",
            Self::SetChannelMute { .. } => "SetChannelMute",
            Self::SetChannelRange { .. } => "SetChannelRange",
            Self::SetChannelCache { .. } => "SetChannelCache",
            Self::AddProcessor { .. } => "AddProcessor",
            Self::RemoveProcessor { .. } => "RemoveProcessor",
            Self::SetProcessorParam { .. } => "SetProcessorParam",
            Self::SetProcessorBypass { .. } => "SetProcessorBypass",
            Self::AddGroup(_) => "AddGroup",
            Self::RemoveGroup(_) => "RemoveGroup",
            Self::AssignToGroup { .. } => "AssignToGroup",
            Self::SetGroupVolume { .. } => "SetGroupVolume",
            Self::SetRecorder(_) => "SetRecorder",
            Self::StartBounce { .. } => "StartBounce",
            Self::SetChannelCaching(_) => "SetChannelCaching",
            Self::SetRecordDeviceInput(_) => "SetRecordDeviceInput",
            Self::Reset => "Reset",
        };
        f.write_str(name)
    }
}

/// Objects handed back from the render thread for deallocation
pub enum Retired {
    Event(Box<AudioEvent>),
    Processor(Box<dyn Processor>),
    Instrument(Box<Instrument>),
    Group(Box<ChannelGroup>),
    Recorder(Box<dyn RecordingSink>),
    /// A command the render thread could not apply (unknown target)
    Command(EngineCommand),
}

/// Capacity of the command queue
///
/// Building a pattern sends one command per event, so bursts of a few
/// hundred commands are normal.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the retired-object queue
pub const RETIRED_QUEUE_CAPACITY: usize = 1024;

/// Create a new command channel (producer/consumer pair)
pub fn command_channel() -> (rtrb::Producer<EngineCommand>, rtrb::Consumer<EngineCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

/// Create the channel returning removed objects to the control side
pub fn retired_channel() -> (rtrb::Producer<Retired>, rtrb::Consumer<Retired>) {
    rtrb::RingBuffer::new(RETIRED_QUEUE_CAPACITY)
}

/// Control-side handle of the command queue
pub struct CommandSender {
    producer: rtrb::Producer<EngineCommand>,
}

impl CommandSender {
    pub fn new(producer: rtrb::Producer<EngineCommand>) -> Self {
        Self { producer }
    }

    /// Push a command; hands it back if the queue is full
    pub fn send(&mut self, command: EngineCommand) -> Result<(), EngineCommand> {
        self.producer.push(command).map_err(|e| match e {
            rtrb::PushError::Full(command) => {
                log::warn!("Command queue full, dropping {:?}", command);
                command
            }
        })
    }

    pub fn has_space(&self) -> bool {
        self.producer.slots() > 0
    }
}

/// Hand an object back to the control side
///
/// If the ring is full the object is dropped here, on the render thread.
pub(crate) fn retire(producer: &mut rtrb::Producer<Retired>, item: Retired) {
    if producer.push(item).is_err() {
        log::warn!("Retired queue full, releasing on the render thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_channel_creation() {
        let (mut tx, mut rx) = command_channel();
        tx.push(EngineCommand::SetPosition(42)).unwrap();
        let cmd = rx.pop().unwrap();
        assert!(matches!(cmd, EngineCommand::SetPosition(42)));
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_full_queue_hands_command_back() {
        let (producer, _rx) = rtrb::RingBuffer::new(1);
        let mut sender = CommandSender::new(producer);
        assert!(sender.send(EngineCommand::Play).is_ok());
        assert!(!sender.has_space());
        let rejected = sender.send(EngineCommand::Stop);
        assert!(matches!(rejected, Err(EngineCommand::Stop)));
    }

    #[test]
    fn test_command_size() {
        // payloads beyond a few words must be boxed
        let size = std::mem::size_of::<EngineCommand>();
        assert!(size <= 48, "EngineCommand is {} bytes, expected <= 48", size);
    }
}
