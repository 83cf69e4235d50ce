//! Native processors
//!
//! Small built-in processors used by channels and the master bus. Heavier
//! DSP (filters, reverbs, dynamics) plugs in through the same trait.

mod delay;
mod gain;
mod limiter;

pub use delay::DelayProcessor;
pub use gain::GainProcessor;
pub use limiter::LimiterProcessor;
