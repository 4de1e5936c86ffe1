//! Domain layer containing the order event and its wire codec.
//!
//! # Module Organization
//!
//! - `foundation` - Error taxonomy and shared primitives
//! - `order` - The "order created" event, its validation and codec

pub mod foundation;
pub mod order;
