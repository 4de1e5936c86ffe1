//! In-process event adapters.
//!
//! - `InMemoryBroker` - Single-queue broker with manual acknowledgement,
//!   used by tests and local runs in place of RabbitMQ

mod in_memory;

pub use in_memory::{InMemoryBroker, InMemoryDeliverySource, Rejection};
