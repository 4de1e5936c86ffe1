//! Application layer - Handlers and the consume loop.
//!
//! This layer coordinates ports: it runs handlers over deliveries and guards
//! what gets published.

mod consumer;
mod notification_handler;
mod redelivery;
mod validating_publisher;

pub use consumer::{ConsumerState, ConsumerStats, NotificationConsumer, StopReason};
pub use notification_handler::NotificationHandler;
pub use redelivery::{FailureAction, RedeliveryPolicy};
pub use validating_publisher::ValidatingPublisher;
