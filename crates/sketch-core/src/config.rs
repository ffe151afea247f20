//! Storage layout and autosave timing configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where records and the index live in the key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Prefix of per-document record keys (`{prefix}{id}`)
    #[serde(default = "default_record_prefix")]
    pub record_prefix: String,

    /// Key of the single index record
    #[serde(default = "default_index_key")]
    pub index_key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            record_prefix: default_record_prefix(),
            index_key: default_index_key(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.record_prefix.is_empty() {
            return Err(ConfigError::EmptyRecordPrefix);
        }
        if self.index_key.is_empty() {
            return Err(ConfigError::EmptyIndexKey);
        }
        // The repair pass lists keys by prefix, so the index must not look like a record
        if self.index_key.starts_with(&self.record_prefix) {
            return Err(ConfigError::IndexShadowsRecords {
                index_key: self.index_key.clone(),
                record_prefix: self.record_prefix.clone(),
            });
        }
        Ok(())
    }
}

fn default_record_prefix() -> String {
    "drawing:".to_string()
}

fn default_index_key() -> String {
    "drawing-index".to_string()
}

/// Autosave timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosaveConfig {
    /// Quiet period after the last change before a save (default: 3s)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Changes reported sooner than this after attach are ignored (default: 500ms)
    #[serde(default = "default_init_grace_ms")]
    pub init_grace_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            init_grace_ms: default_init_grace_ms(),
        }
    }
}

impl AutosaveConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn init_grace(&self) -> Duration {
        Duration::from_millis(self.init_grace_ms)
    }
}

fn default_debounce_ms() -> u64 {
    3_000
}

fn default_init_grace_ms() -> u64 {
    500
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("record_prefix must not be empty")]
    EmptyRecordPrefix,

    #[error("index_key must not be empty")]
    EmptyIndexKey,

    #[error("index_key {index_key:?} starts with record_prefix {record_prefix:?}")]
    IndexShadowsRecords {
        index_key: String,
        record_prefix: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let store: StoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(store, StoreConfig::default());
        assert!(store.validate().is_ok());

        let autosave: AutosaveConfig = serde_json::from_str(r#"{"debounce_ms": 250}"#).unwrap();
        assert_eq!(autosave.debounce(), Duration::from_millis(250));
        assert_eq!(autosave.init_grace(), Duration::from_millis(500));
    }

    #[test]
    fn test_index_key_must_not_match_record_prefix() {
        let config = StoreConfig {
            record_prefix: "d/".into(),
            index_key: "d/index".into(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IndexShadowsRecords { .. })
        ));
    }
}
