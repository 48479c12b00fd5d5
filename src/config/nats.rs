//! NATS configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// NATS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// Server URLs (comma-separated)
    #[serde(default = "default_servers")]
    pub servers: String,

    /// Fixed cluster size. When unset, nodes are counted with a discovery
    /// ping on every cross-node request.
    pub nodes_number: Option<usize>,

    /// How long a discovery ping collects replies, in milliseconds
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_ms: u64,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl NatsConfig {
    pub fn server_list(&self) -> Vec<String> {
        self.servers
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validate NATS configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.server_list().is_empty() {
            return Err(ValidationError::InvalidNatsServers);
        }
        if self.nodes_number == Some(0) {
            return Err(ValidationError::InvalidNodesNumber);
        }
        if self.discovery_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            nodes_number: None,
            discovery_timeout_ms: default_discovery_timeout(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

fn default_servers() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_discovery_timeout() -> u64 {
    200
}

fn default_connect_timeout() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nats_config_defaults() {
        let config = NatsConfig::default();
        assert_eq!(config.discovery_timeout(), Duration::from_millis(200));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert!(config.nodes_number.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_list_parsing() {
        let config = NatsConfig {
            servers: "nats://a:4222, nats://b:4222,".to_string(),
            ..Default::default()
        };
        assert_eq!(config.server_list(), vec!["nats://a:4222", "nats://b:4222"]);
    }

    #[test]
    fn test_validation_rejects_zero_nodes() {
        let config = NatsConfig {
            nodes_number: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidNodesNumber)
        ));
    }

    #[test]
    fn test_validation_rejects_empty_servers() {
        let config = NatsConfig {
            servers: " , ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
