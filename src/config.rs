//! Flowstate configuration
//!
//! Loaded from TOML at startup, falls back to defaults if no config file
//! exists or it fails to parse.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowstateConfig {
    /// Flow controller behaviour.
    pub flow: FlowConfig,
    /// Log output.
    pub logging: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Protect a session automatically once it reaches high focus.
    pub auto_protect: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub json: bool,
    /// Also append logs to this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

// ============================================================
// Defaults
// ============================================================

impl Default for FlowConfig {
    fn default() -> Self {
        Self { auto_protect: true }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "flowstate=info".into(),
            json: false,
            file: None,
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl FlowstateConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Strict variant of `load` for callers that must not run on defaults.
    pub fn load_strict(path: &Path) -> flowstate_core::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| flowstate_core::Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Render as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults() {
        let config = FlowstateConfig::default();
        assert!(config.flow.auto_protect);
        assert_eq!(config.logging.filter, "flowstate=info");
        assert!(!config.logging.json);
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FlowstateConfig::load(&dir.path().join("absent.toml"));
        assert_eq!(config, FlowstateConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file = write_config("[flow]\nauto_protect = false\n");
        let config = FlowstateConfig::load(file.path());
        assert!(!config.flow.auto_protect);
        assert_eq!(config.logging, LogConfig::default());
    }

    #[test]
    fn invalid_file_falls_back_but_strict_errors() {
        let file = write_config("[flow\nauto_protect = maybe");
        assert_eq!(FlowstateConfig::load(file.path()), FlowstateConfig::default());
        let err = FlowstateConfig::load_strict(file.path()).unwrap_err();
        assert!(matches!(err, flowstate_core::Error::Config(_)));
    }

    #[test]
    fn to_toml_reloads_identically() {
        let mut config = FlowstateConfig::default();
        config.logging.json = true;
        config.logging.file = Some(PathBuf::from("/tmp/flowstate.log"));
        let file = write_config(&config.to_toml());
        assert_eq!(FlowstateConfig::load(file.path()), config);
    }
}
