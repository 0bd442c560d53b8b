//! Application configuration
//!
//! Loaded from a TOML file (default `~/.config/ocpp-cp-simulator/config.toml`,
//! overridable via `CP_SIM_CONFIG`). Every section has defaults so the
//! simulator starts without any file at all.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Central system endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base WebSocket URL; the charge point serial is appended as a path
    /// segment.
    pub url: String,
    /// Shared secret as a hex string; decoded and combined with the serial
    /// number into Basic credentials.
    pub auth_key: String,
    /// Fixed backoff between reconnect attempts, in seconds.
    pub reconnect_delay_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:9000/ocpp".to_string(),
            // "sim-secret"
            auth_key: "73696d2d736563726574".to_string(),
            reconnect_delay_secs: 5,
        }
    }
}

/// One charge point to simulate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargePointSeed {
    pub serial: String,
    /// Driver identity tokens cycled by the auto-charge loop.
    pub uids: Vec<String>,
    /// Parameter overrides applied on top of persisted state and defaults.
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    /// Where charge point state and logs are persisted.
    pub data_dir: PathBuf,
    pub logging: LoggingConfig,
    /// Charge points to seed on startup, merged with whatever the data
    /// directory already holds.
    pub charge_points: Vec<ChargePointSeed>,
    /// Start the auto-charge loop for every charge point after boot.
    pub auto_start: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            data_dir: PathBuf::from("charge-points"),
            logging: LoggingConfig::default(),
            charge_points: Vec::new(),
            auto_start: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }
}

/// `$XDG_CONFIG_HOME/ocpp-cp-simulator/config.toml`, falling back to a
/// relative path when no config directory is known.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-cp-simulator")
        .join("config.toml")
}
