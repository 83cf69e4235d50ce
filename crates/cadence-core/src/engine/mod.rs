//! Render engine - command queue, render loop, host controller
//!
//! - `AudioEngine`: everything the render thread owns, one `render()` per cycle
//! - `Engine`: control-side handle that starts, stops and feeds the render thread
//! - `EngineCommand`: changes queued from control threads into the render loop

mod command;
mod controller;
#[allow(clippy::module_inception)]
mod engine;
mod error;

pub use command::*;
pub use controller::*;
pub use engine::*;
pub use error::*;
