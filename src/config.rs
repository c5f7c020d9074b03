/// `config.rs` - loader configuration
///
/// Every field has a default, so an empty JSON object (or no file at all)
/// is a valid configuration.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// VM instructions one script may run before it is aborted.
    /// `None` disables the hook.
    pub instruction_budget: Option<u32>,
    /// Interpreter-wide allocation cap in bytes.
    pub memory_limit_bytes: Option<usize>,
    /// Largest archive entry that will be read into memory.
    pub max_entry_bytes: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            instruction_budget: Some(1_000_000),
            memory_limit_bytes: Some(64 * 1024 * 1024),
            max_entry_bytes: 4 * 1024 * 1024,
        }
    }
}

impl LoaderConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        assert_eq!(LoaderConfig::from_json_str("{}").unwrap(), LoaderConfig::default());
    }

    #[test]
    fn null_budget_disables_the_hook() {
        let cfg = LoaderConfig::from_json_str(r#"{"instruction_budget": null, "max_entry_bytes": 10}"#)
            .unwrap();
        assert_eq!(cfg.instruction_budget, None);
        assert_eq!(cfg.max_entry_bytes, 10);
        assert_eq!(cfg.memory_limit_bytes, LoaderConfig::default().memory_limit_bytes);
    }

    #[test]
    fn malformed_config_is_rejected() {
        assert!(matches!(
            LoaderConfig::from_json_str(r#"{"max_entry_bytes": "lots"}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = LoaderConfig::from_file(Path::new("/nonexistent/talepack.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
