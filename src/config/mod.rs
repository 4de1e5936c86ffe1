//! Application configuration module
//!
//! Configuration is loaded once at startup and passed explicitly to the
//! components that need it. Sources, lowest precedence first:
//!
//! 1. an optional `appsettings.{json,toml,yaml}` file in the working directory
//!    with a `RabbitMQ` section (`Host`, `Port`, `UserName`, `Password`,
//!    `QueueName`)
//! 2. environment variables with the `ORDER_EVENTS` prefix, nested values
//!    separated by double underscores
//!
//! Keys are matched without regard to case, `_` or `-`: `QueueName` in the
//! file and `ORDER_EVENTS__RABBITMQ__QUEUE_NAME` name the same setting.
//!
//! # Example
//!
//! ```no_run
//! use order_events::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Broker at {}", config.rabbitmq.endpoint());
//! ```

mod consumer;
mod error;
mod keys;
mod logging;
mod rabbitmq;

pub use consumer::ConsumerConfig;
pub use error::{ConfigError, ValidationError};
pub use logging::{LogFormat, LoggingConfig};
pub use rabbitmq::RabbitMqConfig;

use serde::Deserialize;
use std::path::Path;

use keys::Normalized;

/// Base name of the optional settings file.
pub const SETTINGS_FILE: &str = "appsettings";

/// Prefix of the environment variables read by [`AppConfig::load()`].
pub const ENV_PREFIX: &str = "ORDER_EVENTS";

/// Root application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Broker connection settings
    pub rabbitmq: RabbitMqConfig,

    /// Consume loop settings
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from the optional settings file and environment
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads `appsettings.*` from the working directory if present
    /// 3. Overlays environment variables with `ORDER_EVENTS` prefix
    ///
    /// # Environment Variable Format
    ///
    /// - `ORDER_EVENTS__RABBITMQ__HOST=rabbitmq` -> `rabbitmq.host = rabbitmq`
    /// - `ORDER_EVENTS__CONSUMER__WORKERS=8` -> `consumer.workers = 8`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required values are missing or cannot be
    /// parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Self::build(config::File::with_name(SETTINGS_FILE).required(false))
    }

    /// Load configuration from an explicit settings file, still overlaid
    /// by the environment.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::build(config::File::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Clone + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .add_source(Normalized(file))
            .add_source(Normalized(
                config::Environment::default()
                    .prefix(ENV_PREFIX)
                    .separator("__"),
            ))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.rabbitmq.validate()?;
        self.consumer.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}
