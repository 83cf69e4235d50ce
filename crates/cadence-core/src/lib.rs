//! Cadence Core - real-time render engine for a step-sequencing DAW
//!
//! Instruments hold sample and synth events indexed by measure. Every
//! cycle the render loop collects the events under the transport window,
//! mixes them into per-instrument channels, runs the processing chains,
//! sums groups and master, and hands the interleaved result to an audio
//! driver and an optional recorder.

pub mod audio;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod context;
pub mod effect;
pub mod engine;
pub mod envelope;
pub mod event;
pub mod gc;
pub mod group;
pub mod instrument;
pub mod notify;
pub mod record;
pub mod sequencer;
pub mod synth;
pub mod transport;
pub mod types;

pub use engine::{ChainTarget, Engine, EngineCommand, EngineError, EngineResult};
pub use types::*;
