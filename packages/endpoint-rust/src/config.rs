//! Endpoint configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use busline_core::EndpointInstance;
use chrono::TimeDelta;
use serde::Deserialize;

/// Errors from loading an [`EndpointConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

/// Settings for one endpoint instance.
///
/// Every field has a default, so a config file only lists what it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Logical endpoint name; also the default reply-to and timeout address.
    pub endpoint_name: String,
    /// Distinguishes this instance from others of the same endpoint.
    pub instance_discriminator: Option<String>,
    /// Per-message processing deadline. `None` disables it.
    pub message_processing_timeout_ms: Option<u64>,
    /// Poll interval the timeout store suggests when nothing is scheduled.
    pub timeout_empty_poll_interval_ms: u64,
    /// How long `stop` waits for in-flight messages.
    pub drain_timeout_ms: u64,
    /// Message kind -> logical endpoint.
    pub routes: HashMap<String, String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            endpoint_name: String::new(),
            instance_discriminator: None,
            message_processing_timeout_ms: None,
            timeout_empty_poll_interval_ms: 60_000,
            drain_timeout_ms: 30_000,
            routes: HashMap::new(),
        }
    }
}

impl EndpointConfig {
    /// Minimal config for `endpoint_name` with defaults elsewhere.
    #[must_use]
    pub fn new(endpoint_name: impl Into<String>) -> Self {
        Self {
            endpoint_name: endpoint_name.into(),
            ..Self::default()
        }
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed JSON, [`ConfigError::Invalid`] when
    /// validation fails.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    ///
    /// # Errors
    ///
    /// As [`from_json`](Self::from_json), plus [`ConfigError::Io`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for a blank endpoint name or blank route entries.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "endpoint_name must not be empty".to_string(),
            });
        }
        if let Some((kind, endpoint)) = self
            .routes
            .iter()
            .find(|(kind, endpoint)| kind.trim().is_empty() || endpoint.trim().is_empty())
        {
            return Err(ConfigError::Invalid {
                reason: format!("route `{kind}` -> `{endpoint}` has a blank side"),
            });
        }
        Ok(())
    }

    /// This instance as an [`EndpointInstance`].
    #[must_use]
    pub fn instance(&self) -> EndpointInstance {
        let instance = EndpointInstance::new(self.endpoint_name.clone());
        match &self.instance_discriminator {
            Some(discriminator) => instance.with_discriminator(discriminator.clone()),
            None => instance,
        }
    }

    /// Transport address this instance receives on.
    #[must_use]
    pub fn local_address(&self) -> String {
        self.instance().transport_address()
    }

    #[must_use]
    pub fn message_processing_timeout(&self) -> Option<Duration> {
        self.message_processing_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn timeout_empty_poll_interval(&self) -> TimeDelta {
        TimeDelta::milliseconds(i64::try_from(self.timeout_empty_poll_interval_ms).unwrap_or(i64::MAX))
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = EndpointConfig::from_json(r#"{"endpoint_name": "Sales"}"#).unwrap();
        assert_eq!(config.endpoint_name, "Sales");
        assert_eq!(config.timeout_empty_poll_interval_ms, 60_000);
        assert_eq!(config.drain_timeout(), Duration::from_secs(30));
        assert!(config.message_processing_timeout().is_none());
        assert!(config.routes.is_empty());
        assert_eq!(config.local_address(), "Sales");
    }

    #[test]
    fn full_document_parses() {
        let config = EndpointConfig::from_json(
            r#"{
                "endpoint_name": "Sales",
                "instance_discriminator": "blue",
                "message_processing_timeout_ms": 1500,
                "timeout_empty_poll_interval_ms": 5000,
                "routes": { "ShipOrder": "Shipping" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.local_address(), "Sales-blue");
        assert_eq!(
            config.message_processing_timeout(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(config.timeout_empty_poll_interval(), TimeDelta::seconds(5));
        assert_eq!(config.routes["ShipOrder"], "Shipping");
    }

    #[test]
    fn blank_endpoint_name_is_rejected() {
        let err = EndpointConfig::from_json("{}").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn blank_route_is_rejected() {
        let err = EndpointConfig::from_json(r#"{"endpoint_name": "Sales", "routes": {"X": " "}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = EndpointConfig::from_json("{ nope").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
