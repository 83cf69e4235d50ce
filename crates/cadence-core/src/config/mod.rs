//! Engine configuration
//!
//! Stored as YAML in the user's config directory.
//! Default location: ~/.config/cadence/engine.yaml

mod io;

pub use io::{load_config, save_config};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::transport::TimeSignature;
use crate::types::{BUFFER_SIZE, OUTPUT_CHANNELS, SAMPLE_RATE};

/// Render engine setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Frames per render cycle
    pub buffer_size: usize,
    pub output_channels: usize,
    /// Device input channels (0 disables input)
    pub input_channels: usize,
    /// Initial tempo in BPM
    pub tempo: f64,
    pub time_signature: TimeSignature,
    /// Loop length in bars
    pub amount_of_bars: usize,
    /// Sequencer resolution (16 = sixteenth notes in 4/4)
    pub steps_per_bar: usize,
    /// Let channels cache their rendered output
    pub channel_caching: bool,
    /// Linear master volume (0.0-1.0)
    pub master_volume: f32,
    /// Mix the device input into the output
    pub record_device_input: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            buffer_size: BUFFER_SIZE,
            output_channels: OUTPUT_CHANNELS,
            input_channels: 0,
            tempo: 120.0,
            time_signature: TimeSignature::default(),
            amount_of_bars: 1,
            steps_per_bar: 16,
            channel_caching: false,
            master_volume: 1.0,
            record_device_input: false,
        }
    }
}

impl EngineConfig {
    /// Replace out-of-range values with usable ones
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.sample_rate == 0 {
            log::warn!("EngineConfig: sample_rate 0, using {}", defaults.sample_rate);
            self.sample_rate = defaults.sample_rate;
        }
        if self.buffer_size == 0 {
            log::warn!("EngineConfig: buffer_size 0, using {}", defaults.buffer_size);
            self.buffer_size = defaults.buffer_size;
        }
        if !(self.tempo.is_finite() && self.tempo > 0.0) {
            log::warn!("EngineConfig: invalid tempo {}, using {}", self.tempo, defaults.tempo);
            self.tempo = defaults.tempo;
        }
        self.output_channels = self.output_channels.max(1);
        self.amount_of_bars = self.amount_of_bars.max(1);
        self.steps_per_bar = self.steps_per_bar.max(1);
        self.time_signature.beat_amount = self.time_signature.beat_amount.max(1);
        self.time_signature.beat_unit = self.time_signature.beat_unit.max(1);
        self.master_volume = self.master_volume.clamp(0.0, 1.0);
        self
    }
}

/// Get the default config file path
///
/// Returns: ~/.config/cadence/engine.yaml
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("cadence")
        .join("engine.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_path_ends_with_engine_yaml() {
        let path = default_config_path();
        assert!(path.ends_with("cadence/engine.yaml"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: EngineConfig = serde_yaml::from_str("tempo: 95.5\nbuffer_size: 128\n").unwrap();
        assert_eq!(config.tempo, 95.5);
        assert_eq!(config.buffer_size, 128);
        assert_eq!(config.sample_rate, SAMPLE_RATE);
        assert_eq!(config.time_signature, TimeSignature::default());
    }

    #[test]
    fn test_sanitized() {
        let config = EngineConfig {
            sample_rate: 0,
            tempo: -3.0,
            master_volume: 4.0,
            steps_per_bar: 0,
            ..EngineConfig::default()
        }
        .sanitized();
        assert_eq!(config.sample_rate, SAMPLE_RATE);
        assert_eq!(config.tempo, 120.0);
        assert_eq!(config.master_volume, 1.0);
        assert_eq!(config.steps_per_bar, 1);
    }
}
