//! Client configuration
//!
//! Configuration is read once, defaults are filled in for every optional
//! field, and the result is validated before the client is built. After that
//! it is never mutated.
//!
//! ```toml
//! broker_url = "tcp://broker.local:1883"
//! client_id = "kitchen-sensor"
//! clean_session = false
//! keep_alive_secs = 30
//! username_env = "MQTT_USERNAME"
//! password_env = "MQTT_PASSWORD"
//!
//! [reconnect]
//! min_backoff_ms = 250
//! max_backoff_ms = 30000
//! ```

use crate::protocol::{validate_client_id, Credentials, ValidationError};
use crate::transport::BrokerAddress;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Connection and session settings for one client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Broker URL, `tcp://host:port` or `mqtt://host:port`
    pub broker_url: String,
    /// Client identifier; generated once per client when unset
    #[serde(default)]
    pub client_id: Option<String>,
    /// Discard broker-held session state at connect time
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Maximum quiet interval before a PINGREQ probe, 0 disables keep-alive
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u16,
    /// How long to wait for any traffic after a probe before giving up
    #[serde(default = "default_keep_alive_grace_ms")]
    pub keep_alive_grace_ms: u64,
    /// Upper bound on dial + CONNECT + CONNACK
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Largest packet accepted from or sent to the broker
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// Environment variable containing the username
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable containing the password
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Backoff bounds for automatic reconnection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,
    /// Ceiling the exponential delay never exceeds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Maximum number of attempts (None = unlimited)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_backoff_ms: default_min_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: None, // Unlimited retries by default
        }
    }
}

fn default_clean_session() -> bool {
    true
}

fn default_keep_alive_secs() -> u16 {
    30
}

fn default_keep_alive_grace_ms() -> u64 {
    10_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_max_packet_size() -> usize {
    256 * 1024
}

fn default_min_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },
    #[error("Invalid client ID: {0}")]
    InvalidClientId(#[from] ValidationError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("tcp://localhost:1883")
    }
}

impl ClientConfig {
    /// Configuration for `broker_url` with every other field at its default
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            client_id: None,
            clean_session: default_clean_session(),
            keep_alive_secs: default_keep_alive_secs(),
            keep_alive_grace_ms: default_keep_alive_grace_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_packet_size: default_max_packet_size(),
            username_env: None,
            password_env: None,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker_address()?;

        if let Some(client_id) = &self.client_id {
            validate_client_id(client_id)?;
        }

        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "handshake_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.max_packet_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_packet_size must be greater than 0".to_string(),
            ));
        }

        if self.keep_alive_secs > 0 && self.keep_alive_grace_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_grace_ms must be greater than 0 when keep-alive is enabled"
                    .to_string(),
            ));
        }

        let reconnect = &self.reconnect;
        if reconnect.min_backoff_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.min_backoff_ms must be greater than 0".to_string(),
            ));
        }
        if reconnect.min_backoff_ms > reconnect.max_backoff_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "reconnect.min_backoff_ms ({}) exceeds reconnect.max_backoff_ms ({})",
                reconnect.min_backoff_ms, reconnect.max_backoff_ms
            )));
        }
        if reconnect.max_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "reconnect.max_attempts must be greater than 0 or unset for unlimited".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed broker address
    pub fn broker_address(&self) -> Result<BrokerAddress, ConfigError> {
        BrokerAddress::parse(&self.broker_url)
    }

    /// Configured client identifier, or a freshly generated one
    pub fn resolve_client_id(&self) -> String {
        self.client_id.clone().unwrap_or_else(generate_client_id)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
    }

    pub fn keep_alive_grace(&self) -> Duration {
        Duration::from_millis(self.keep_alive_grace_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Credentials resolved from the configured environment variables
    ///
    /// Resolved on every call so rotated secrets are picked up by the next
    /// reconnect. A missing password variable means an empty password.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = Self::get_env_var_optional(self.username_env.as_ref())?;
        let password = Self::get_env_var_optional(self.password_env.as_ref()).unwrap_or_default();
        Some(Credentials::new(username, password))
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }
}

/// Client identifier that fits the 23 character limit every broker accepts
fn generate_client_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("bl-{}", &suffix[..20])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = ClientConfig::from_toml_str(r#"broker_url = "tcp://localhost:1883""#).unwrap();

        assert_eq!(config.client_id, None);
        assert!(config.clean_session);
        assert_eq!(config.keep_alive_secs, 30);
        assert_eq!(config.keep_alive_grace_ms, 10_000);
        assert_eq!(config.handshake_timeout_ms, 10_000);
        assert_eq!(config.max_packet_size, 256 * 1024);
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
broker_url = "mqtt://broker.local:1884"
client_id = "kitchen-sensor"
clean_session = false
keep_alive_secs = 60
keep_alive_grace_ms = 2000
handshake_timeout_ms = 3000
username_env = "MQTT_USERNAME"
password_env = "MQTT_PASSWORD"

[reconnect]
min_backoff_ms = 100
max_backoff_ms = 5000
max_attempts = 12
"#;

        let config = ClientConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.client_id.as_deref(), Some("kitchen-sensor"));
        assert!(!config.clean_session);
        assert_eq!(config.keep_alive(), Duration::from_secs(60));
        assert_eq!(config.keep_alive_grace(), Duration::from_secs(2));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(3));
        assert_eq!(config.reconnect.min_backoff_ms, 100);
        assert_eq!(config.reconnect.max_backoff_ms, 5000);
        assert_eq!(config.reconnect.max_attempts, Some(12));

        let address = config.broker_address().unwrap();
        assert_eq!(address.host, "broker.local");
        assert_eq!(address.port, 1884);
    }

    #[test]
    fn test_backoff_bounds_must_be_ordered() {
        let mut config = ClientConfig::default();
        config.reconnect.min_backoff_ms = 5000;
        config.reconnect.max_backoff_ms = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let mut config = ClientConfig::default();
        config.reconnect.max_attempts = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_client_id_rejected() {
        let mut config = ClientConfig::default();
        config.client_id = Some("has space".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidClientId(_))
        ));
    }

    #[test]
    fn test_zero_handshake_timeout_rejected() {
        let mut config = ClientConfig::default();
        config.handshake_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generated_client_id_is_valid() {
        let config = ClientConfig::default();
        let first = config.resolve_client_id();
        let second = config.resolve_client_id();

        assert!(validate_client_id(&first).is_ok(), "generated id: {first}");
        assert_ne!(first, second);
    }

    #[test]
    fn test_configured_client_id_is_used() {
        let mut config = ClientConfig::default();
        config.client_id = Some("fixed-id".to_string());
        assert_eq!(config.resolve_client_id(), "fixed-id");
    }

    #[test]
    fn test_credentials_from_env() {
        unsafe {
            std::env::set_var("BROKERLINK_TEST_USER_A", "device");
            std::env::set_var("BROKERLINK_TEST_PASS_A", "secret");
        }

        let mut config = ClientConfig::default();
        config.username_env = Some("BROKERLINK_TEST_USER_A".to_string());
        config.password_env = Some("BROKERLINK_TEST_PASS_A".to_string());

        let creds = config.credentials().expect("credentials should resolve");
        assert_eq!(creds.username, "device");
        assert_eq!(creds.password, "secret");

        unsafe {
            std::env::remove_var("BROKERLINK_TEST_USER_A");
            std::env::remove_var("BROKERLINK_TEST_PASS_A");
        }
    }

    #[test]
    fn test_no_credentials_without_username() {
        let mut config = ClientConfig::default();
        config.username_env = Some("BROKERLINK_TEST_MISSING_USER".to_string());
        assert_eq!(config.credentials(), None);
    }
}
