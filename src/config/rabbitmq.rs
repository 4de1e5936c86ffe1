//! RabbitMQ connection configuration

use lapin::uri::{AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Broker connection settings shared by the publisher and the consumer.
///
/// Field names are the normalized keys (see `config::keys`), so `QueueName`
/// and `QUEUE_NAME` both reach `queue_name`.
#[derive(Debug, Clone, Deserialize)]
pub struct RabbitMqConfig {
    /// Broker host name
    pub host: String,

    /// Broker AMQP port (a numeric string is accepted)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user
    pub username: String,

    /// Login password
    pub password: SecretString,

    /// Queue the order events are sent to and consumed from
    #[serde(rename = "queuename")]
    pub queue_name: String,

    /// Fanout exchange declared by the consumer
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Connection attempts before startup fails
    #[serde(default = "default_connect_max_attempts", rename = "connectmaxattempts")]
    pub connect_max_attempts: u32,

    /// Fixed delay between connection attempts in seconds
    #[serde(default = "default_connect_retry_delay", rename = "connectretrydelaysecs")]
    pub connect_retry_delay_secs: u64,

    /// Interval between recovery attempts after the connection drops, in
    /// seconds. Zero disables recovery.
    #[serde(default = "default_recovery_interval", rename = "recoveryintervalsecs")]
    pub recovery_interval_secs: u64,
}

impl RabbitMqConfig {
    /// Get the connect retry delay as Duration
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_secs(self.connect_retry_delay_secs)
    }

    /// Get the recovery interval, `None` when recovery is disabled
    pub fn recovery_interval(&self) -> Option<Duration> {
        (self.recovery_interval_secs > 0).then(|| Duration::from_secs(self.recovery_interval_secs))
    }

    /// Build the AMQP URI for the default vhost.
    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            scheme: AMQPScheme::AMQP,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.expose_secret().clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: "/".to_string(),
            query: Default::default(),
        }
    }

    /// Human readable endpoint for logs (no credentials).
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate RabbitMQ configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::MissingRequired("RABBITMQ_HOST"));
        }
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.username.is_empty() {
            return Err(ValidationError::MissingRequired("RABBITMQ_USERNAME"));
        }
        if self.queue_name.trim().is_empty() {
            return Err(ValidationError::MissingRequired("RABBITMQ_QUEUE_NAME"));
        }
        if self.exchange.trim().is_empty() {
            return Err(ValidationError::MissingRequired("RABBITMQ_EXCHANGE"));
        }
        if self.connect_max_attempts == 0 {
            return Err(ValidationError::InvalidConnectAttempts);
        }
        Ok(())
    }
}

impl Default for RabbitMqConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: SecretString::new(String::new()),
            queue_name: String::new(),
            exchange: default_exchange(),
            connect_max_attempts: default_connect_max_attempts(),
            connect_retry_delay_secs: default_connect_retry_delay(),
            recovery_interval_secs: default_recovery_interval(),
        }
    }
}

fn default_port() -> u16 {
    5672
}

fn default_exchange() -> String {
    "trigger".to_string()
}

fn default_connect_max_attempts() -> u32 {
    5
}

fn default_connect_retry_delay() -> u64 {
    5
}

fn default_recovery_interval() -> u64 {
    10
}
