//! Redis configuration

use serde::Deserialize;

use super::error::ValidationError;

/// Redis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_url")]
    pub url: String,
}

impl RedisConfig {
    /// Validate Redis configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.is_empty() {
            return Err(ValidationError::MissingRequired("REDIS_URL"));
        }
        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(ValidationError::InvalidRedisUrl);
        }
        Ok(())
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: default_url() }
    }
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_missing_url() {
        let config = RedisConfig { url: String::new() };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingRequired(_))
        ));
    }

    #[test]
    fn test_validation_invalid_scheme() {
        let config = RedisConfig {
            url: "http://localhost:6379".to_string(),
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidRedisUrl)
        ));
    }

    #[test]
    fn test_validation_tls_url() {
        let config = RedisConfig {
            url: "rediss://cache.internal:6380".to_string(),
        };
        assert!(config.validate().is_ok());
    }
}
