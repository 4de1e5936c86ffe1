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
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Connection attempts must be at least 1")]
    InvalidConnectAttempts,

    #[error("Consumer needs at least one worker")]
    InvalidWorkerCount,

    #[error("Max redeliveries must be at least 1 when set")]
    InvalidMaxRedeliveries,

    #[error("Unknown log format: {0}")]
    InvalidLogFormat(String),
}
