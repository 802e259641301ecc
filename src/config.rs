//! Configuration module
//!
//! The service reads a TOML file (default
//! `~/.config/chargegrid-csms/config.toml`). Every section has defaults, so a
//! missing file or a file with only a few keys is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to encode TOML: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// OCPP WebSocket listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// A station with no heartbeat or event for this long is Offline.
    pub staleness_secs: u64,
    /// How often the monitor sweeps for stale links.
    pub check_interval_secs: u64,
    /// Interval returned to stations in BootNotification.conf.
    pub advertised_interval_secs: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 600,
            check_interval_secs: 30,
            advertised_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub timeout_secs: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Power at or below this value (W) counts as not drawing.
    pub idle_power_threshold_w: f64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_power_threshold_w: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub capacity: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9100".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub heartbeat: HeartbeatConfig,
    pub commands: CommandsConfig,
    pub sessions: SessionsConfig,
    pub notifications: NotificationsConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat.staleness_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.staleness_secs must be positive".into(),
            ));
        }
        if self.heartbeat.check_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "heartbeat.check_interval_secs must be positive".into(),
            ));
        }
        if self.commands.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "commands.timeout_secs must be positive (unbounded waits are not allowed)".into(),
            ));
        }
        if self.notifications.capacity == 0 {
            return Err(ConfigError::Invalid(
                "notifications.capacity must be positive".into(),
            ));
        }
        if self.sessions.idle_power_threshold_w < 0.0 {
            return Err(ConfigError::Invalid(
                "sessions.idle_power_threshold_w must not be negative".into(),
            ));
        }
        Ok(())
    }

    pub fn staleness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat.staleness_secs as i64)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.commands.timeout_secs)
    }
}

pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chargegrid-csms")
        .join("config.toml")
}
