use std::time::Duration;

use quire_blocks::{is_temporary_id, NestingRules};
use serde::{Deserialize, Serialize};

/// Editor tuning shared by sessions and the reconciler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditorConfig {
    /// Quiet period after the last keystroke before a text block is saved
    pub debounce_ms: u64,
    /// Prefix of client-minted ids
    pub temp_id_prefix: String,
    pub max_page_depth: usize,
    pub max_block_depth: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            temp_id_prefix: "temp-".to_string(),
            max_page_depth: 16,
            max_block_depth: 8,
        }
    }
}

impl EditorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn nesting_rules(&self) -> NestingRules {
        NestingRules {
            max_page_depth: self.max_page_depth,
            max_block_depth: self.max_block_depth,
        }
    }

    pub fn is_temporary(&self, id: &str) -> bool {
        is_temporary_id(id, &self.temp_id_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EditorConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.nesting_rules(), NestingRules::default());
        assert!(config.is_temporary("temp-abc-1"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EditorConfig = serde_json::from_str(r#"{"debounceMs": 50}"#).unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.temp_id_prefix, "temp-");
        assert_eq!(config.max_block_depth, 8);
    }

    #[test]
    fn test_custom_temp_prefix() {
        let config: EditorConfig = serde_json::from_str(r#"{"tempIdPrefix": "local:"}"#).unwrap();
        assert!(config.is_temporary("local:abc-1"));
        assert!(!config.is_temporary("temp-abc-1"));
    }
}
