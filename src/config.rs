use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::scripting::completion::DEFAULT_POLL_INTERVAL;
use crate::scripting::report::DEFAULT_HISTORY_CAPACITY;
use crate::scripting::timer::DEFAULT_REBASE_THRESHOLD;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("IO error reading config: {0}")]
    IoError(String),
}

/// Helper function for default true value
fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "Bridge".to_string()
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_rebase_threshold() -> i64 {
    DEFAULT_REBASE_THRESHOLD
}

fn default_completion_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

/// Settings consumed when a guest environment is built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Table the built-ins and introspection values are published under
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Number of call records kept for error reports
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Tick counter value at which pending delays are rebased
    #[serde(default = "default_rebase_threshold")]
    pub rebase_threshold: i64,

    /// Cadence for checking external-completion waits (default: 200ms)
    #[serde(default = "default_completion_poll_interval")]
    pub completion_poll_interval_ms: u64,

    /// Convert arguments to their declared kinds (off: structural conversion only)
    #[serde(default = "default_true")]
    pub type_checking: bool,

    #[serde(default = "default_true")]
    pub auto_convert: bool,

    #[serde(default)]
    pub log_conversions: bool,

    #[serde(default = "default_true")]
    pub warn_on_kind_mismatch: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            history_capacity: default_history_capacity(),
            rebase_threshold: default_rebase_threshold(),
            completion_poll_interval_ms: default_completion_poll_interval(),
            type_checking: true,
            auto_convert: true,
            log_conversions: false,
            warn_on_kind_mismatch: true,
        }
    }
}

impl BridgeConfig {
    /// Default location: `<platform config dir>/tickbridge/config.toml`
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "tickbridge").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.to_path_buf()));
        }

        let content =
            fs::read_to_string(path).map_err(|e| ConfigLoadError::IoError(e.to_string()))?;
        let config =
            toml::from_str(&content).map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path`, falling back to defaults when it is missing or unreadable
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigLoadError::NotFound(_)) => Self::default(),
            Err(e) => {
                warn!("{}; using default configuration", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&self)?;
        fs::write(path, content)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}
