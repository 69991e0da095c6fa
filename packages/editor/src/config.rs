use crate::errors::{EditorError, EditorResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_CONFIG_NAME: &str = "quire.config.json";

/// Editor configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    /// Identifies the editor in logs and serialized state
    #[serde(default)]
    pub namespace: String,

    #[serde(default = "default_true")]
    pub editable: bool,

    /// Upper bound on transform passes per update
    #[serde(default = "default_max_transform_iterations")]
    pub max_transform_iterations: usize,

    /// Non-discrete updates stay pending until the next discrete one or an
    /// explicit flush
    #[serde(default)]
    pub batch_updates: bool,

    #[serde(default = "default_history_depth")]
    pub history_depth: usize,

    #[serde(default = "default_history_merge_window_ms")]
    pub history_merge_window_ms: u64,

    /// Class names handed to the render surface untouched
    #[serde(default)]
    pub theme: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_max_transform_iterations() -> usize {
    100
}

fn default_history_depth() -> usize {
    100
}

fn default_history_merge_window_ms() -> u64 {
    1000
}

impl EditorConfig {
    pub fn from_json(json: &str) -> EditorResult<Self> {
        serde_json::from_str(json).map_err(|e| EditorError::Config(e.to_string()))
    }

    /// Load config from a file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> EditorResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            editable: default_true(),
            max_transform_iterations: default_max_transform_iterations(),
            batch_updates: false,
            history_depth: default_history_depth(),
            history_merge_window_ms: default_history_merge_window_ms(),
            theme: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "namespace": "notes",
            "editable": false,
            "maxTransformIterations": 12,
            "theme": { "paragraph": "p-body" }
        }"#;

        let config = EditorConfig::from_json(json).unwrap();
        assert_eq!(config.namespace, "notes");
        assert!(!config.editable);
        assert_eq!(config.max_transform_iterations, 12);
        assert_eq!(config.history_depth, 100);
        assert_eq!(config.theme.get("paragraph").map(String::as_str), Some("p-body"));
    }

    #[test]
    fn test_default_config() {
        let config = EditorConfig::default();
        assert!(config.editable);
        assert!(!config.batch_updates);
        assert_eq!(config.history_merge_window_ms, 1000);
        assert_eq!(EditorConfig::from_json("{}").unwrap(), config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = EditorConfig::load("/nonexistent/quire.config.json").unwrap();
        assert_eq!(config, EditorConfig::default());
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = EditorConfig::from_json("{ \"editable\": 3 }").unwrap_err();
        assert!(matches!(err, EditorError::Config(_)));
    }
}
