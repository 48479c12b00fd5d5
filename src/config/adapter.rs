//! Connection adapter configuration

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use super::error::ValidationError;

/// Which adapter backs the server.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdapterDriver {
    /// Single node, no transport
    #[default]
    Local,
    Redis,
    Nats,
    Amqp,
}

impl fmt::Display for AdapterDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterDriver::Local => "local",
            AdapterDriver::Redis => "redis",
            AdapterDriver::Nats => "nats",
            AdapterDriver::Amqp => "amqp",
        };
        f.write_str(name)
    }
}

/// Adapter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub driver: AdapterDriver,

    /// Deadline for cross-node requests in milliseconds
    #[serde(default = "default_requests_timeout")]
    pub requests_timeout_ms: u64,

    /// Namespace for topic names; unrelated deployments sharing a broker
    /// need different prefixes
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl AdapterConfig {
    pub fn requests_timeout(&self) -> Duration {
        Duration::from_millis(self.requests_timeout_ms)
    }

    /// Validate adapter configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.requests_timeout_ms == 0 || self.requests_timeout_ms > 60_000 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.prefix.trim().is_empty() {
            return Err(ValidationError::EmptyPrefix);
        }
        Ok(())
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            driver: AdapterDriver::default(),
            requests_timeout_ms: default_requests_timeout(),
            prefix: default_prefix(),
        }
    }
}

fn default_requests_timeout() -> u64 {
    5_000
}

fn default_prefix() -> String {
    "pushline".to_string()
}
