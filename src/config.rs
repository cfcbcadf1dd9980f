//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `monitor.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ApiConfig: backend base url, token, timeout, historical seed size.
//!     - MqttConfig: broker address, credentials, keep alive, reconnect delay.
//!     - ServerConfig: dashboard bind address.
//!     - EngineConfig: per-device history length.
//!     - LoggingConfig: log level and per-message logging.
//!
//! ==============================================================================

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::engine::DEFAULT_HISTORY_LIMIT;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MonitorConfig {
    pub api: ApiConfig,
    pub mqtt: MqttConfig,
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    /// e.g. "http://localhost:5000/api"
    pub base_url: String,
    /// bearer token for the backend, if it requires one
    pub token: Option<String>,
    pub timeout_seconds: u64,
    /// how many recent records to replay at startup
    pub history_seed_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            token: None,
            timeout_seconds: 10,
            history_seed_limit: 200,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_seconds: u64,
    pub reconnect_delay_seconds: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "sensor-monitor".to_string(),
            username: None,
            password: None,
            keep_alive_seconds: 30,
            reconnect_delay_seconds: 5,
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds.max(5))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { history_limit: DEFAULT_HISTORY_LIMIT }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// log every applied sensor message at info level
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: false }
    }
}

/// where the active configuration came from
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
    /// a file was found but could not be used
    Fallback { path: PathBuf, error: String },
}

impl ConfigSource {
    /// called once logging is up; loading happens before that
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!(path = %path.display(), "configuration loaded"),
            ConfigSource::Defaults => warn!("no config file found - using defaults"),
            ConfigSource::Fallback { path, error } => {
                warn!(path = %path.display(), %error, "failed to load config - using defaults")
            }
        }
    }
}

impl MonitorConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("failed to parse config")
    }

    /// Load with default fallback
    pub fn load_or_default() -> (Self, ConfigSource) {
        let paths = [
            PathBuf::from("config").join("monitor.toml"),
            PathBuf::from("..").join("config").join("monitor.toml"),
        ];

        for path in paths {
            if path.exists() {
                return match Self::load(&path) {
                    Ok(config) => (config, ConfigSource::File(path)),
                    Err(e) => (
                        Self::default(),
                        ConfigSource::Fallback { path, error: format!("{:#}", e) },
                    ),
                };
            }
        }

        (Self::default(), ConfigSource::Defaults)
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        info!(
            backend = %self.api.base_url,
            broker = %format!("{}:{}", self.mqtt.host, self.mqtt.port),
            dashboard = %self.server.bind,
            history_limit = self.engine.history_limit,
            seed_limit = self.api.history_seed_limit,
            log_level = %self.logging.level,
            "monitor configuration"
        );
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = MonitorConfig::from_toml("").unwrap();
        assert_eq!(config.api.history_seed_limit, 200);
        assert_eq!(config.engine.history_limit, 50);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = MonitorConfig::from_toml(
            r#"
            [api]
            base_url = "http://backend:8080/api"
            token = "secret"

            [mqtt]
            host = "broker.local"
            username = "monitor"
            password = "pw"

            [engine]
            history_limit = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.api.base_url, "http://backend:8080/api");
        assert_eq!(config.api.token.as_deref(), Some("secret"));
        assert_eq!(config.api.timeout_seconds, 10);
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.username.as_deref(), Some("monitor"));
        assert_eq!(config.engine.history_limit, 10);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(MonitorConfig::from_toml("[mqtt\nport = 1").is_err());
        assert!(MonitorConfig::from_toml("[mqtt]\nport = \"not a number\"").is_err());
    }

    #[test]
    fn durations_are_clamped() {
        let mut mqtt = MqttConfig::default();
        mqtt.keep_alive_seconds = 0;
        assert_eq!(mqtt.keep_alive(), Duration::from_secs(5));
        let mut api = ApiConfig::default();
        api.timeout_seconds = 0;
        assert_eq!(api.timeout(), Duration::from_secs(1));
    }
}
