//! Audio driver adapters
//!
//! - `Null`: no device, real-time pacing (default)
//! - `Offline`: no device, no pacing (bounce)
//! - `Cpal`: system audio through cpal (feature `cpal-backend`)

mod driver;
mod error;

#[cfg(feature = "cpal-backend")]
mod cpal_driver;

#[cfg(feature = "cpal-backend")]
pub use cpal_driver::CpalDriver;
pub use driver::{open_driver, AudioDriver, DriverConfig, DriverKind, MockDriver, NullDriver};
pub use error::{DriverError, DriverResult};
