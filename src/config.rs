//! Configuration for the X-Sense cloud client
//!
//! Loaded from a TOML file by the embedding application. Every section has
//! defaults matching the production backend, so an empty file is a valid
//! configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub auth: AuthSection,
}

/// HTTPS API section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSection {
    /// Backend entrypoint; all requests are POSTs against this URL
    #[serde(default = "default_api_host")]
    pub host: String,
    /// Client type reported in every request body
    #[serde(default = "default_client_type")]
    pub client_type: String,
    /// App version string the backend expects
    #[serde(default = "default_app_version")]
    pub app_version: String,
    /// Numeric app code paired with the version
    #[serde(default = "default_app_code")]
    pub app_code: String,
    /// Secret for request MAC signing, obtained out of band; unsigned
    /// requests carry a placeholder MAC
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// MQTT transport section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker port (TLS websocket endpoint)
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How long to wait for a broker SubAck before a subscribe fails
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Default bound on a shadow request/response round trip
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Shadow topic prefix; reserved topics on AWS IoT start with "$aws"
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

/// Credential lifecycle section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSection {
    /// Refresh credentials once now >= expiry - margin
    #[serde(default = "default_refresh_safety_margin_secs")]
    pub refresh_safety_margin_secs: u64,
}

fn default_api_host() -> String {
    "https://api.x-sense-iot.com/app".to_string()
}

fn default_client_type() -> String {
    "2".to_string()
}

fn default_app_version() -> String {
    "v1.18.0_20240311".to_string()
}

fn default_app_code() -> String {
    "1180".to_string()
}

fn default_mqtt_port() -> u16 {
    443
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_ack_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_topic_prefix() -> String {
    "$aws".to_string()
}

fn default_refresh_safety_margin_secs() -> u64 {
    300 // 5 minutes
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            client_type: default_client_type(),
            app_version: default_app_version(),
            app_code: default_app_code(),
            client_secret: None,
        }
    }
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            port: default_mqtt_port(),
            keep_alive_secs: default_keep_alive_secs(),
            ack_timeout_secs: default_ack_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            topic_prefix: default_topic_prefix(),
        }
    }
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            refresh_safety_margin_secs: default_refresh_safety_margin_secs(),
        }
    }
}

impl MqttSection {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AuthSection {
    pub fn refresh_safety_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_safety_margin_secs as i64)
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ClientConfig {
    /// Load configuration from a TOML file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.host.is_empty() {
            return Err(ConfigError::Invalid("api.host must not be empty".into()));
        }
        url::Url::parse(&self.api.host)
            .map_err(|e| ConfigError::Invalid(format!("api.host is not a valid URL: {e}")))?;
        if self.mqtt.topic_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "mqtt.topic_prefix must not be empty".into(),
            ));
        }
        if self.mqtt.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.request_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
