//! Configuration management
//!
//! Handles:
//! - MQTT broker settings and credentials
//! - Publish cadence and optional RNG seed
//! - Environment overrides (after `.env` is loaded by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "IDAT_METER_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MeterConfig {
    pub mqtt: MqttConfig,
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)] // Never write passwords back out
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublishConfig {
    pub interval_ms: u64,
    /// Fixed seed for reproducible readings.
    pub seed: Option<u64>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            seed: None,
        }
    }
}

impl MqttConfig {
    /// Configured client id, or a fresh `idat-meter-xxxxxxxx` one.
    pub fn client_id(&self) -> String {
        match &self.client_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                format!("idat-meter-{}", &suffix[..8])
            }
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl PublishConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl MeterConfig {
    /// Load config from `IDAT_METER_CONFIG` or the OS config directory,
    /// then apply environment overrides.
    pub async fn load() -> Result<Self, ConfigError> {
        let path = Self::config_file_path();
        Self::load_from(path.as_deref(), |key| std::env::var(key).ok()).await
    }

    /// Load from an optional file with a custom environment lookup.
    /// A missing or empty file yields the defaults.
    pub async fn load_from<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
                if content.trim().is_empty() {
                    Self::default()
                } else {
                    toml::from_str(&content)?
                }
            }
            _ => Self::default(),
        };

        config.apply_env_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// `IDAT_METER_CONFIG` if set, else `<config_dir>/idat-meter/config.toml`.
    pub fn config_file_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }

        let mut path = dirs::config_dir()?;
        path.push("idat-meter");
        path.push("config.toml");
        Some(path)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("IDAT_MQTT_HOST") {
            self.mqtt.broker_host = host;
        }
        if let Some(port) = lookup("IDAT_MQTT_PORT") {
            self.mqtt.broker_port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "IDAT_MQTT_PORT".into(),
                reason: format!("{port:?} is not a port number"),
            })?;
        }
        if let Some(id) = lookup("IDAT_MQTT_CLIENT_ID") {
            self.mqtt.client_id = Some(id);
        }
        if let Some(user) = lookup("IDAT_MQTT_USERNAME") {
            self.mqtt.username = Some(user);
        }
        if let Some(password) = lookup("IDAT_MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker_host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "mqtt.broker_host".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.mqtt.broker_port == 0 {
            return Err(ConfigError::Invalid {
                key: "mqtt.broker_port".into(),
                reason: "must be non-zero".into(),
            });
        }
        if self.publish.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "publish.interval_ms".into(),
                reason: "must be non-zero".into(),
            });
        }
        Ok(())
    }
}
