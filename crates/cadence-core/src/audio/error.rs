//! Audio driver error types

use thiserror::Error;

/// Errors that can occur while opening or driving an audio device
#[derive(Error, Debug)]
pub enum DriverError {
    /// No audio devices available
    #[error("No audio output devices found")]
    NoDevices,

    /// Device exists but could not be opened
    #[error("Failed to open audio device: {0}")]
    DeviceOpen(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlay(String),

    /// Device cannot do the requested sample format or channel layout
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Driver kind not compiled into this build
    #[error("Audio backend not available: {0}")]
    BackendUnavailable(&'static str),

    /// Bounce requested on a driver that only renders in real time
    #[error("Driver does not support offline rendering")]
    OfflineUnsupported,
}

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;
