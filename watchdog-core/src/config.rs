//! Configuration management
//!
//! Handles:
//! - Serial keepalive settings (port, baud rate, interval, probe timeout)
//! - MQTT broker settings for the command relay
//! - The watchdog identity both paths share
//!
//! Values come from built-in defaults, then the TOML file, then whatever the
//! binaries layer on top from the environment and command line. The broker
//! password is never read from or written to the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::ConfigError;
use crate::identity::WatchdogIdentity;
use crate::keepalive::{KeepaliveState, KeepaliveTimer};
use crate::relay::{BrokerCredentials, SessionOptions};
use crate::serial::DEFAULT_BAUD_RATE;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub identity: WatchdogIdentity,
    pub serial: SerialConfig,
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub interval_secs: u64,
    pub probe_timeout_ms: u64,
    /// Consecutive misses that trigger an error log; 0 disables it
    pub miss_report_threshold: u32,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(skip)] // Never serialize passwords
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Wait for a status reply after publishing a command
    pub grace_ms: u64,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("client_id", &self.client_id)
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("grace_ms", &self.grace_ms)
            .finish()
    }
}

fn default_serial_port() -> &'static str {
    if cfg!(target_os = "windows") {
        "COM4"
    } else {
        "/dev/ttyUSB0"
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port().to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            interval_secs: 30,
            probe_timeout_ms: 2000,
            miss_report_threshold: 3,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: "watchdog-control".to_string(),
            keep_alive_secs: 60,
            grace_ms: 2000,
        }
    }
}

impl SerialConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn keepalive_state(&self) -> Result<KeepaliveState, ConfigError> {
        KeepaliveState::new(self.interval())
    }

    pub fn timer(&self) -> KeepaliveTimer {
        KeepaliveTimer::new(self.miss_report_threshold)
    }
}

impl BrokerConfig {
    pub fn credentials(&self) -> Option<BrokerCredentials> {
        self.username.as_ref().map(|username| BrokerCredentials {
            username: username.clone(),
            password: self.password.clone(),
        })
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            client_id: self.client_id.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            ..SessionOptions::default()
        }
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

impl WatchdogConfig {
    /// Load config from `path`, or the OS-specific location when `None`.
    ///
    /// A missing file is not an error: defaults are returned.
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_file_path()?,
        };

        if !config_path.exists() {
            debug!("No config file at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(|source| ConfigError::Io {
                path: config_path.clone(),
                source,
            })?;
        let config: WatchdogConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: config_path.clone(),
            source,
        })?;
        config.serial.keepalive_state()?;

        debug!("Loaded config from {}", config_path.display());
        Ok(config)
    }

    /// Save config to `path` (without the broker password)
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await.map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push("atx-watchdog");
        path.push("config.toml");
        Ok(path)
    }
}
