//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid bind host: {0}")]
    InvalidHost(String),

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Adapter prefix must not be empty")]
    EmptyPrefix,

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,

    #[error("Invalid NATS server list")]
    InvalidNatsServers,

    #[error("NATS nodes_number must be at least 1")]
    InvalidNodesNumber,

    #[error("Invalid AMQP URI format")]
    InvalidAmqpUri,

    #[error("Invalid RabbitMQ management URL format")]
    InvalidManagementUrl,
}
