//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `PUSHLINE` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use pushline::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Adapter driver: {}", config.adapter.driver);
//! ```

mod adapter;
mod amqp;
mod error;
mod nats;
mod redis;
mod server;

pub use adapter::{AdapterConfig, AdapterDriver};
pub use amqp::AmqpConfig;
pub use error::{ConfigError, ValidationError};
pub use nats::NatsConfig;
pub use self::redis::RedisConfig;
pub use server::{Environment, LogFormat, ServerConfig};

use serde::Deserialize;

/// Root application configuration
///
/// Every section has defaults, so an empty environment yields a single-node
/// server on port 6001. Load using [`AppConfig::load()`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment, logging)
    #[serde(default)]
    pub server: ServerConfig,

    /// Adapter selection and cross-node request settings
    #[serde(default)]
    pub adapter: AdapterConfig,

    /// Redis pub/sub transport
    #[serde(default)]
    pub redis: RedisConfig,

    /// NATS transport
    #[serde(default)]
    pub nats: NatsConfig,

    /// AMQP transport
    #[serde(default)]
    pub amqp: AmqpConfig,
}

impl AppConfig {
    /// Reads `PUSHLINE__*` variables (after a `.env` file, when one exists)
    /// into typed sections. Unset values fall back to each section's default.
    ///
    /// - `PUSHLINE__SERVER__PORT=6001` sets `server.port`
    /// - `PUSHLINE__ADAPTER__DRIVER=nats` sets `adapter.driver`
    /// - `PUSHLINE__NATS__SERVERS=nats://a:4222,nats://b:4222` sets `nats.servers`
    ///
    /// # Errors
    ///
    /// `ConfigError::LoadError` when a value does not parse into its field.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("PUSHLINE")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate the server, the adapter and the section of the selected
    /// driver. Sections of unused drivers are not checked.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any checked value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.adapter.validate()?;
        match self.adapter.driver {
            AdapterDriver::Local => {}
            AdapterDriver::Redis => self.redis.validate()?,
            AdapterDriver::Nats => self.nats.validate()?,
            AdapterDriver::Amqp => self.amqp.validate()?,
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
