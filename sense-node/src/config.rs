//! Configuration loading for sense-node.
//!
//! Configuration is loaded from a TOML file. Every field has a default, so
//! an empty file (or no file at all) yields a working node.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for a SenseLink node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Node identity.
    #[serde(default)]
    pub node: NodeConfig,
    /// Reachability protocol.
    #[serde(default)]
    pub reachability: ReachabilityConfig,
    /// Streaming subscriptions.
    #[serde(default)]
    pub streaming: StreamingConfig,
}

/// Node identity configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Device label sent as the payload of `/ping`, `/echo` and `/closing`.
    #[serde(default = "default_label")]
    pub label: String,
}

/// Reachability configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReachabilityConfig {
    /// How long to wait for an echo after a ping (default: 2s).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Window for "reached recently" (default: 30s).
    #[serde(default = "default_recent_window_ms")]
    pub recent_window_ms: u64,
    /// Interval of the background sweep (default: 10s).
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Enable the background sweep (default: false).
    #[serde(default)]
    pub sweep_enabled: bool,
}

/// Streaming configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Samples kept per source (default: 500, 0 = unlimited).
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Consecutive failed deliveries before a subscription stops (default: 10).
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Interval used by requesters that do not pick one (default: 1s).
    #[serde(default = "default_update_interval_ms")]
    pub default_update_interval_ms: u64,
}

// Default value functions
fn default_label() -> String {
    "senselink".to_string()
}

fn default_timeout_ms() -> u64 {
    2_000
}

fn default_recent_window_ms() -> u64 {
    30_000
}

fn default_sweep_interval_ms() -> u64 {
    10_000
}

fn default_buffer_capacity() -> usize {
    sense_types::DEFAULT_CAPACITY
}

fn default_max_consecutive_failures() -> u32 {
    sense_core::DeliveryCursor::DEFAULT_MAX_FAILURES
}

fn default_update_interval_ms() -> u64 {
    sense_types::DataRequest::UPDATE_INTERVAL_DEFAULT
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
        }
    }
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            recent_window_ms: default_recent_window_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            sweep_enabled: false,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            max_consecutive_failures: default_max_consecutive_failures(),
            default_update_interval_ms: default_update_interval_ms(),
        }
    }
}

impl ReachabilityConfig {
    /// Ping timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Sweep interval as a [`Duration`], at least 1ms.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl StreamingConfig {
    /// Buffer capacity, with 0 mapped to unlimited.
    pub fn capacity(&self) -> Option<usize> {
        match self.buffer_capacity {
            0 => None,
            n => Some(n),
        }
    }
}

impl Config {
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

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            source: e,
        })
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
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
