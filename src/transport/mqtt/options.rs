//! MQTT connection options and reconnect policy

use crate::auth::CredentialBundle;
use crate::config::MqttSection;
use crate::error::ApiError;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;

/// One backend region's broker endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MqttEndpoint {
    pub host: String,
    pub region: String,
}

/// Reconnection policy for the session supervisor
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds; the last value sustains
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![250, 500, 1000, 2500],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for the given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        if self.backoff_pattern.is_empty() {
            self.sustained_delay
        } else {
            let index = (attempt.saturating_sub(1)) as usize;
            if index < self.backoff_pattern.len() {
                self.backoff_pattern[index]
            } else {
                self.sustained_delay
            }
        }
    }

    /// True when another attempt is allowed
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt <= max,
            None => true,
        }
    }
}

/// Build broker options from the current credential bundle.
///
/// The client id gets a per-connection suffix so a stale half-closed session
/// on the broker never collides with its replacement.
pub fn configure_mqtt_options(
    client_id: &str,
    endpoint: &MqttEndpoint,
    credentials: &CredentialBundle,
    config: &MqttSection,
) -> Result<MqttOptions, ApiError> {
    if endpoint.host.is_empty() {
        return Err(ApiError::transport(format!(
            "no broker host for region {}",
            endpoint.region
        )));
    }

    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let client_id = format!("{client_id}-{suffix}");

    let mut mqtt_options = MqttOptions::new(client_id, &endpoint.host, config.port);
    mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(config.keep_alive_secs));
    // temporary key material from the credential bundle authenticates the
    // websocket upgrade
    mqtt_options.set_credentials(&credentials.access_key_id, &credentials.session_token);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bundle() -> CredentialBundle {
        CredentialBundle {
            access_key_id: "AKIA_TEST".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "session".to_string(),
            expires_at: Utc::now(),
            refresh_token: None,
        }
    }

    #[test]
    fn test_backoff_pattern_then_sustain() {
        let config = ReconnectConfig::default();
        assert_eq!(config.calculate_backoff_delay(1), 250);
        assert_eq!(config.calculate_backoff_delay(4), 2500);
        assert_eq!(config.calculate_backoff_delay(5), 5000);
        assert_eq!(config.calculate_backoff_delay(100), 5000);
    }

    #[test]
    fn test_empty_pattern_uses_sustained() {
        let config = ReconnectConfig {
            max_attempts: None,
            backoff_pattern: Vec::new(),
            sustained_delay: 123,
        };
        assert_eq!(config.calculate_backoff_delay(1), 123);
    }

    #[test]
    fn test_allows_attempt() {
        let unlimited = ReconnectConfig::default();
        assert!(unlimited.allows_attempt(1_000_000));

        let limited = ReconnectConfig {
            max_attempts: Some(3),
            ..ReconnectConfig::default()
        };
        assert!(limited.allows_attempt(3));
        assert!(!limited.allows_attempt(4));
    }

    #[test]
    fn test_configure_mqtt_options() {
        let endpoint = MqttEndpoint {
            host: "a1bc-ats.iot.eu-central-1.amazonaws.com".to_string(),
            region: "eu-central-1".to_string(),
        };
        let options =
            configure_mqtt_options("client-1", &endpoint, &bundle(), &MqttSection::default());
        assert!(options.is_ok());
    }

    #[test]
    fn test_empty_host_rejected() {
        let endpoint = MqttEndpoint {
            host: String::new(),
            region: "eu-central-1".to_string(),
        };
        let result =
            configure_mqtt_options("client-1", &endpoint, &bundle(), &MqttSection::default());
        assert!(matches!(result, Err(ApiError::Transport { .. })));
    }
}
