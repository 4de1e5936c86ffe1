//! Foundation module - Shared domain primitives.
//!
//! Contains the error taxonomy and small identifiers used by every layer.

mod errors;

pub use errors::{
    BusError, ConnectionError, DecodeError, DeliveryTag, DialError, HandlerError, PublishError,
    ValidationError,
};
