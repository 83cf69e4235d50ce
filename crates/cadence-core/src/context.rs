//! Engine-wide render settings
//!
//! [`EngineContext`] bundles everything the render path needs to know
//! about the current setup. It is built at setup time and owned by the
//! render loop; nothing here is global.

use crate::config::EngineConfig;
use crate::transport::Transport;
use crate::types::{to_linear, to_log};

#[derive(Debug, Clone)]
pub struct EngineContext {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub output_channels: usize,
    pub input_channels: usize,
    pub transport: Transport,
    /// Logarithmically scaled master volume
    master_volume: f32,
    /// Allow channels to cache their output
    pub channel_caching: bool,
    /// Read the driver input into the input channel
    pub record_device_input: bool,
}

impl EngineContext {
    pub fn from_config(config: &EngineConfig) -> Self {
        let transport = Transport::new(
            config.sample_rate,
            config.tempo,
            config.time_signature,
            config.amount_of_bars,
            config.steps_per_bar,
        );
        Self {
            sample_rate: config.sample_rate,
            buffer_size: config.buffer_size.max(1),
            output_channels: config.output_channels.max(1),
            input_channels: config.input_channels,
            transport,
            master_volume: to_log(config.master_volume),
            channel_caching: config.channel_caching,
            record_device_input: config.record_device_input,
        }
    }

    /// Master volume as linear 0.0-1.0 value
    pub fn master_volume(&self) -> f32 {
        to_linear(self.master_volume)
    }

    pub fn log_master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = to_log(volume);
    }

    /// Interleaved sample count for one cycle
    pub fn interleaved_size(&self, frames: usize) -> usize {
        frames * self.output_channels
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
