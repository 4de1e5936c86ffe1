//! Order events and their wire format.

pub mod codec;
mod event;

pub use event::OrderEvent;
