//! Engine notifications
//!
//! The render thread reports transport progress and lifecycle changes as
//! [`Notification`] values through a [`NotificationSink`]. The default sink
//! is the sending half of a bounded crossbeam channel: sends never block,
//! and a notification that does not fit is dropped.

use crossbeam::channel::{Receiver, Sender, TrySendError};

/// Something the engine wants its host to know
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Engine was set up and is ready to start
    Registered,
    /// Tempo change applied at a cycle boundary
    TempoUpdated {
        tempo: f64,
        beat_amount: u32,
        beat_unit: u32,
        samples_per_beat: usize,
        samples_per_bar: usize,
        samples_per_step: usize,
    },
    /// Transport crossed a step boundary
    StepPosition {
        step: usize,
        /// Sample index within the cycle's buffer
        buffer_offset: usize,
    },
    /// Transport reached the notification marker
    MarkerReached { position: usize, buffer_offset: usize },
    /// Recording progress, in frames written so far
    RecordingUpdate { frames: u64 },
    /// Recording could not be written
    RecordingFailed { reason: String },
    /// Bounce range fully rendered and written
    BounceComplete,
    /// Driver could not be opened; the engine did not start
    HardwareUnavailable,
}

/// Receiver of engine notifications
///
/// `notify` is called from the render thread and must not block.
pub trait NotificationSink: Send {
    fn notify(&self, notification: Notification);
}

impl NotificationSink for Sender<Notification> {
    fn notify(&self, notification: Notification) {
        match self.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                log::debug!("Notification queue full, dropping {:?}", dropped);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _notification: Notification) {}
}

/// Bounded notification channel shared by the engine and its host
pub struct NotificationBus {
    sender: Sender<Notification>,
    receiver: Receiver<Notification>,
}

impl NotificationBus {
    /// Create a bus with bounded capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam::channel::bounded(capacity);
        Self { sender, receiver }
    }

    /// Sink for the render thread
    pub fn sender(&self) -> Sender<Notification> {
        self.sender.clone()
    }

    /// Receiver for the host
    pub fn subscribe(&self) -> Receiver<Notification> {
        self.receiver.clone()
    }

    /// Publish from a control thread (non-blocking)
    pub fn publish(&self, notification: Notification) {
        self.sender.notify(notification);
    }

    /// Everything currently queued
    pub fn drain(&self) -> Vec<Notification> {
        self.receiver.try_iter().collect()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_bus() {
        let bus = NotificationBus::new(16);
        let rx = bus.subscribe();

        bus.publish(Notification::StepPosition {
            step: 3,
            buffer_offset: 17,
        });

        match rx.recv().unwrap() {
            Notification::StepPosition { step, buffer_offset } => {
                assert_eq!(step, 3);
                assert_eq!(buffer_offset, 17);
            }
            other => panic!("Wrong notification: {:?}", other),
        }
    }

    #[test]
    fn test_full_bus_drops_instead_of_blocking() {
        let bus = NotificationBus::new(2);
        let sink = bus.sender();
        for _ in 0..5 {
            sink.notify(Notification::BounceComplete);
        }
        assert_eq!(bus.drain().len(), 2);
    }
}
