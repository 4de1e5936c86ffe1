//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the application and the message broker. Adapters implement these ports.
//!
//! ## Producer side
//!
//! - `MessageBusClient` - Publishes "order created" events
//!
//! ## Consumer side
//!
//! - `DeliverySource` - Stream of deliveries from one subscription
//! - `DeliveryAcker` - Acknowledge / reject a delivery by tag
//! - `MessageHandler` - Processes the payload of one delivery
//!
//! ## Connection
//!
//! - `Dialer` - Single connection attempt, retried by the connection manager

mod delivery;
mod dialer;
mod message_bus;
mod message_handler;

pub use delivery::{Delivery, DeliveryAcker, DeliverySource};
pub use dialer::Dialer;
pub use message_bus::MessageBusClient;
pub use message_handler::MessageHandler;
