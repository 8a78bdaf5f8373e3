//! Configuration for the sync engine.
//!
//! Configuration can be built in code or loaded from a TOML file:
//!
//! ```toml
//! label = "workspace-root"
//! graceful_stop_timeout_ms = 5000
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Name attached to the engine's tracing span.
    #[serde(default = "default_label")]
    pub label: String,
    /// How long `stop_gracefully` waits for pending local pushes.
    #[serde(default = "default_graceful_stop_timeout_ms")]
    pub graceful_stop_timeout_ms: u64,
}

fn default_label() -> String {
    "replica-sync".to_string()
}

fn default_graceful_stop_timeout_ms() -> u64 {
    10_000 // 10 seconds
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            graceful_stop_timeout_ms: default_graceful_stop_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Set the tracing label.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Set the graceful stop timeout.
    pub fn with_graceful_stop_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_stop_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The graceful stop timeout as a [`Duration`].
    pub fn graceful_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_stop_timeout_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
