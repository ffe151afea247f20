//! Configuration loading

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sketch_core::{AutosaveConfig, StoreConfig};

/// Main configuration for the sketchbook CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SketchConfig {
    /// Key layout inside the store directory
    #[serde(default)]
    pub store: StoreConfig,

    /// Autosave timing for `watch` and `import`
    #[serde(default)]
    pub autosave: AutosaveConfig,
}

impl SketchConfig {
    /// Load `config.json` from the data directory, writing the defaults there
    /// if it does not exist yet.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_file = data_dir.join("config.json");

        let config = if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: SketchConfig = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {:?}", config_file))?;
            tracing::debug!("Loaded configuration from {:?}", config_file);
            config
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_file);
            let config = SketchConfig::default();

            std::fs::create_dir_all(data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

            // Write default config for reference
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            config
        };

        config
            .store
            .validate()
            .with_context(|| format!("Invalid store settings in {:?}", config_file))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_writes_defaults() {
        let temp = TempDir::new().unwrap();
        let data_dir = temp.path().join("sketches");

        let config = SketchConfig::load(&data_dir).unwrap();
        assert_eq!(config, SketchConfig::default());
        assert!(data_dir.join("config.json").exists());

        // Second load reads the file it wrote
        assert_eq!(SketchConfig::load(&data_dir).unwrap(), config);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("config.json"),
            r#"{"autosave": {"debounce_ms": 750}}"#,
        )
        .unwrap();

        let config = SketchConfig::load(temp.path()).unwrap();
        assert_eq!(config.autosave.debounce_ms, 750);
        assert_eq!(config.autosave.init_grace_ms, 500);
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_invalid_store_layout_is_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("config.json"),
            r#"{"store": {"record_prefix": "", "index_key": "idx"}}"#,
        )
        .unwrap();

        assert!(SketchConfig::load(temp.path()).is_err());
    }
}
