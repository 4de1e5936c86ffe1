//! RabbitMQ adapters built on `lapin`.
//!
//! - `ConnectionManager` / `LapinDialer` - Connect with bounded retry
//! - `RabbitMqPublisher` - `MessageBusClient` over the default exchange
//! - `RabbitMqDeliverySource` - Manual-ack subscription with recovery through a `Subscriber`
//! - `ChannelAcker` - Ack/reject on the delivering channel
//! - `Topology` - Exchange, queue and dead-letter declarations

mod acker;
mod connection;
mod delivery_source;
mod publisher;
mod topology;

pub use acker::ChannelAcker;
pub use connection::{ConnectionManager, LapinDialer, RetryPolicy, Session};
pub use delivery_source::{
    LapinSubscriber, LapinSubscription, RabbitMqDeliverySource, Subscriber, Subscription,
    SubscriptionOptions, DELIVERY_COUNT_HEADER,
};
pub use publisher::{PublishSession, RabbitMqPublisher};
pub use topology::{Declaration, Topology, DEAD_LETTER_EXCHANGE_ARG, DEAD_LETTER_QUEUE_SUFFIX};
