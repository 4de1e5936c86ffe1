//! Order Events - RabbitMQ event bus between the order and notification services
//!
//! The order service publishes an "order created" event after storing an
//! order; the notification service consumes the queue with manual
//! acknowledgement and logs one notification per order.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;

#[cfg(test)]
mod test_support;
