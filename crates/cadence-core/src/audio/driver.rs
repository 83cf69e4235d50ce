//! Driver adapter boundary
//!
//! The render thread pushes each cycle's interleaved output into an
//! [`AudioDriver`]. `write_output` paces the render loop: it returns once
//! the device (or the simulated clock) has room for the next cycle.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::error::{DriverError, DriverResult};
use crate::types::Sample;

/// Which driver adapter to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverKind {
    /// No device; output is discarded at real-time pace
    #[default]
    Null,
    /// No device and no pacing; renders as fast as possible
    Offline,
    /// System audio device through cpal
    Cpal,
}

/// Parameters for opening a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    pub sample_rate: u32,
    pub input_channels: usize,
    pub output_channels: usize,
    /// Frames per render cycle
    pub buffer_size: usize,
}

/// Audio device as seen by the render loop
pub trait AudioDriver: Send {
    /// Hand one cycle of interleaved output to the device
    fn write_output(&mut self, interleaved: &[Sample], frames: usize);

    /// Read up to `frames` frames of interleaved input; returns frames read
    fn read_input(&mut self, interleaved: &mut [Sample], frames: usize) -> usize;

    /// Release the device
    fn close(&mut self);

    /// True if the driver can render faster than real time
    fn is_offline_render_supported(&self) -> bool {
        false
    }
}

/// Open a driver of the given kind
///
/// Failures are reported synchronously; nothing keeps running on error.
pub fn open_driver(kind: DriverKind, config: &DriverConfig) -> DriverResult<Box<dyn AudioDriver>> {
    log::info!(
        "open_driver: {:?} at {} Hz, {} in / {} out, {} frames",
        kind,
        config.sample_rate,
        config.input_channels,
        config.output_channels,
        config.buffer_size
    );
    match kind {
        DriverKind::Null => Ok(Box::new(NullDriver::paced(config))),
        DriverKind::Offline => Ok(Box::new(NullDriver::offline(config))),
        #[cfg(feature = "cpal-backend")]
        DriverKind::Cpal => Ok(Box::new(super::cpal_driver::CpalDriver::open(config)?)),
        #[cfg(not(feature = "cpal-backend"))]
        DriverKind::Cpal => Err(DriverError::BackendUnavailable("cpal (enable the cpal-backend feature)")),
    }
}

// ─────────────────────────────────────────────────────────────
// Null driver
// ─────────────────────────────────────────────────────────────

/// Driver without a device
///
/// Paced mode sleeps so that cycles follow the wall clock; offline mode
/// returns immediately. Input is always silence.
#[derive(Debug)]
pub struct NullDriver {
    sample_rate: u32,
    paced: bool,
    started: Option<Instant>,
    frames_written: u64,
}

impl NullDriver {
    pub fn paced(config: &DriverConfig) -> Self {
        Self {
            sample_rate: config.sample_rate.max(1),
            paced: true,
            started: None,
            frames_written: 0,
        }
    }

    pub fn offline(config: &DriverConfig) -> Self {
        Self {
            paced: false,
            ..Self::paced(config)
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl AudioDriver for NullDriver {
    fn write_output(&mut self, _interleaved: &[Sample], frames: usize) {
        self.frames_written += frames as u64;
        if !self.paced {
            return;
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        let due = Duration::from_secs_f64(self.frames_written as f64 / self.sample_rate as f64);
        if let Some(wait) = due.checked_sub(started.elapsed()) {
            std::thread::sleep(wait);
        }
    }

    fn read_input(&mut self, interleaved: &mut [Sample], _frames: usize) -> usize {
        interleaved.fill(0.0);
        0
    }

    fn close(&mut self) {
        self.started = None;
    }

    fn is_offline_render_supported(&self) -> bool {
        !self.paced
    }
}

// ─────────────────────────────────────────────────────────────
// Mock driver
// ─────────────────────────────────────────────────────────────

/// Test driver capturing everything written to it
///
/// Clone the handles returned by [`MockDriver::output`] before boxing the
/// driver to inspect the output afterwards.
#[derive(Debug, Default)]
pub struct MockDriver {
    output: Arc<Mutex<Vec<Sample>>>,
    input: Vec<Sample>,
    input_channels: usize,
    input_position: usize,
    closed: Arc<Mutex<bool>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide interleaved input played back once by `read_input`
    pub fn with_input(mut self, input: Vec<Sample>, channels: usize) -> Self {
        self.input = input;
        self.input_channels = channels.max(1);
        self
    }

    /// Everything written so far (interleaved)
    pub fn output(&self) -> Arc<Mutex<Vec<Sample>>> {
        Arc::clone(&self.output)
    }

    pub fn closed(&self) -> Arc<Mutex<bool>> {
        Arc::clone(&self.closed)
    }
}

impl AudioDriver for MockDriver {
    fn write_output(&mut self, interleaved: &[Sample], _frames: usize) {
        if let Ok(mut output) = self.output.lock() {
            output.extend_from_slice(interleaved);
        }
    }

    fn read_input(&mut self, interleaved: &mut [Sample], frames: usize) -> usize {
        interleaved.fill(0.0);
        if self.input_channels == 0 {
            return 0;
        }
        let wanted = (frames * self.input_channels).min(interleaved.len());
        let available = self.input.len().saturating_sub(self.input_position).min(wanted);
        interleaved[..available].copy_from_slice(&self.input[self.input_position..self.input_position + available]);
        self.input_position += available;
        available / self.input_channels
    }

    fn close(&mut self) {
        if let Ok(mut closed) = self.closed.lock() {
            *closed = true;
        }
    }

    fn is_offline_render_supported(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DriverConfig {
        DriverConfig {
            sample_rate: 44100,
            input_channels: 0,
            output_channels: 2,
            buffer_size: 64,
        }
    }

    #[test]
    fn test_open_null_and_offline() {
        let null = open_driver(DriverKind::Null, &config()).unwrap();
        assert!(!null.is_offline_render_supported());
        let offline = open_driver(DriverKind::Offline, &config()).unwrap();
        assert!(offline.is_offline_render_supported());
    }

    #[cfg(not(feature = "cpal-backend"))]
    #[test]
    fn test_cpal_without_feature_fails_synchronously() {
        let result = open_driver(DriverKind::Cpal, &config());
        assert!(matches!(result, Err(DriverError::BackendUnavailable(_))));
    }

    #[test]
    fn test_paced_driver_follows_wall_clock() {
        let mut driver = NullDriver::paced(&DriverConfig {
            sample_rate: 1000,
            ..config()
        });
        let started = Instant::now();
        for _ in 0..3 {
            driver.write_output(&[0.0; 20], 10);
        }
        assert!(started.elapsed() >= Duration::from_millis(25));
        assert_eq!(driver.frames_written(), 30);
    }

    #[test]
    fn test_mock_driver_captures_and_plays_input() {
        let mut driver = MockDriver::new().with_input(vec![0.1, 0.2, 0.3], 1);
        let output = driver.output();
        driver.write_output(&[1.0, -1.0], 1);
        assert_eq!(*output.lock().unwrap(), vec![1.0, -1.0]);

        let mut input = [9.0; 2];
        assert_eq!(driver.read_input(&mut input, 2), 2);
        assert_eq!(input, [0.1, 0.2]);
        assert_eq!(driver.read_input(&mut input, 2), 1);
        assert_eq!(input, [0.3, 0.0]);

        let closed = driver.closed();
        driver.close();
        assert!(*closed.lock().unwrap());
    }
}
