//! YAML load/save for [`EngineConfig`]

use anyhow::{Context, Result};
use std::path::Path;

use super::EngineConfig;

/// Load the engine configuration
///
/// A missing file yields the defaults. An unreadable or malformed file
/// logs a warning and yields the defaults too, so a broken config never
/// keeps the engine from starting. Loaded values are sanitized.
pub fn load_config(path: &Path) -> EngineConfig {
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: No config at {:?}, using defaults", path);
        return EngineConfig::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("load_config: Failed to read {:?}: {}, using defaults", path, e);
            return EngineConfig::default();
        }
    };

    match serde_yaml::from_str::<EngineConfig>(&contents) {
        Ok(config) => {
            log::info!(
                "load_config: {} Hz, {} frames, {} BPM",
                config.sample_rate,
                config.buffer_size,
                config.tempo
            );
            config.sanitized()
        }
        Err(e) => {
            log::warn!("load_config: Failed to parse {:?}: {}, using defaults", path, e);
            EngineConfig::default()
        }
    }
}

/// Save the engine configuration, creating parent directories
pub fn save_config(config: &EngineConfig, path: &Path) -> Result<()> {
    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize engine config")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TimeSignature;

    #[test]
    fn test_missing_file_returns_default() {
        let config = load_config(Path::new("/nonexistent/cadence/engine.yaml"));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.yaml");

        let config = EngineConfig {
            tempo: 87.0,
            amount_of_bars: 4,
            time_signature: TimeSignature {
                beat_amount: 3,
                beat_unit: 4,
            },
            channel_caching: true,
            ..EngineConfig::default()
        };
        save_config(&config, &path).unwrap();

        assert_eq!(load_config(&path), config);
    }

    #[test]
    fn test_malformed_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "tempo: [not, a, number]").unwrap();
        assert_eq!(load_config(&path), EngineConfig::default());
    }
}
