//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the application to the message broker:
//! - `rabbitmq` - Production broker over AMQP (`lapin`)
//! - `events` - In-memory broker for tests

pub mod events;
pub mod rabbitmq;

pub use events::{InMemoryBroker, InMemoryDeliverySource, Rejection};
pub use rabbitmq::{
    ChannelAcker, ConnectionManager, LapinDialer, RabbitMqDeliverySource, RabbitMqPublisher,
    RetryPolicy, Session, SubscriptionOptions, Topology,
};
