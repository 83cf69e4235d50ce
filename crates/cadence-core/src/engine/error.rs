//! Engine lifecycle errors

use thiserror::Error;

use crate::audio::DriverError;
use crate::record::RecordingError;

/// Errors raised by the control-side [`Engine`](super::Engine)
#[derive(Error, Debug)]
pub enum EngineError {
    /// The render thread owns the engine state right now
    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Audio driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Failed to spawn render thread: {0}")]
    ThreadSpawn(std::io::Error),

    /// Render thread panicked; engine state was rebuilt from the config
    #[error("Render thread panicked")]
    ThreadJoin,

    /// Command queue full; the command was dropped
    #[error("Command queue full")]
    QueueFull,
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
