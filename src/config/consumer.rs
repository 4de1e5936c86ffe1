//! Consumer configuration

use serde::Deserialize;

use super::error::ValidationError;

/// Settings for the notification consume loop.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Number of worker tasks running the handler concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Unacknowledged deliveries the broker may push ahead of processing
    #[serde(default = "default_prefetch_count", rename = "prefetchcount")]
    pub prefetch_count: u16,

    /// Redeliveries allowed before a failing message is rejected without
    /// requeue. Unset means unbounded requeue.
    #[serde(default, rename = "maxredeliveries")]
    pub max_redeliveries: Option<u32>,

    /// Dead-letter exchange set on the queue as `x-dead-letter-exchange`
    #[serde(default, rename = "deadletterexchange")]
    pub dead_letter_exchange: Option<String>,

    /// Consumer tag announced to the broker
    #[serde(default = "default_consumer_tag", rename = "consumertag")]
    pub consumer_tag: String,
}

impl ConsumerConfig {
    /// Validate consumer configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.workers == 0 {
            return Err(ValidationError::InvalidWorkerCount);
        }
        if self.max_redeliveries == Some(0) {
            return Err(ValidationError::InvalidMaxRedeliveries);
        }
        Ok(())
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            prefetch_count: default_prefetch_count(),
            max_redeliveries: None,
            dead_letter_exchange: None,
            consumer_tag: default_consumer_tag(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_prefetch_count() -> u16 {
    16
}

fn default_consumer_tag() -> String {
    "notification-service".to_string()
}
