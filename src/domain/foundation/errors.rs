//! Error types shared by the publishing and consuming sides of the bus.
//!
//! The taxonomy mirrors how each failure is handled:
//!
//! | Error | Raised by | Handling |
//! |-------|-----------|----------|
//! | `ConnectionError` | connection manager | fatal, aborts startup |
//! | `PublishError` | publisher | surfaced to caller, not retried |
//! | `DecodeError` | codec | handler failure, delivery requeued |
//! | `HandlerError` | message handler | handler failure, delivery requeued |
//! | `BusError` | consume loop plumbing | logged, loop keeps running |

use thiserror::Error;

/// Broker-assigned identifier of one delivered message.
pub type DeliveryTag = u64;

/// Errors that occur when an order event fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Field '{field}' cannot be empty")]
    EmptyField { field: String },

    #[error("Field '{field}' must be positive, got {actual}")]
    NotPositive { field: String, actual: i64 },
}

impl ValidationError {
    /// Creates an empty field validation error.
    pub fn empty_field(field: impl Into<String>) -> Self {
        ValidationError::EmptyField { field: field.into() }
    }

    /// Creates a non-positive value validation error.
    pub fn not_positive(field: impl Into<String>, actual: impl Into<i64>) -> Self {
        ValidationError::NotPositive {
            field: field.into(),
            actual: actual.into(),
        }
    }
}

/// A single failed attempt to open a broker connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialError {
    /// Network-level failure; worth retrying.
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    /// The broker answered but refused us (bad credentials, vhost).
    #[error("broker refused connection: {0}")]
    Refused(String),
}

impl DialError {
    /// Whether the connection manager should try again after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DialError::Unreachable(_))
    }
}

/// The broker could not be reached within the retry budget.
#[derive(Debug, Clone, Error)]
#[error("failed to connect to broker after {attempts} attempt(s)")]
pub struct ConnectionError {
    pub attempts: u32,
    #[source]
    pub cause: DialError,
}

/// Failure to hand an event to the broker.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("order event is invalid: {0}")]
    Invalid(#[from] ValidationError),

    #[error("failed to encode order event: {0}")]
    Encode(String),

    #[error("broker unavailable: {0}")]
    Unavailable(#[from] DialError),

    #[error("transport failure while publishing: {0}")]
    Transport(String),
}

/// The payload is not a well-formed order event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed order event payload: {0}")]
pub struct DecodeError(pub String);

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError(err.to_string())
    }
}

/// Anything that goes wrong while processing one delivery.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("handler failed: {0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Errors raised by the consume loop plumbing (topology, stream, ack/reject).
#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to reach broker: {0}")]
    Dial(#[from] DialError),

    #[error("failed to declare topology: {0}")]
    Topology(String),

    #[error("delivery stream failed: {0}")]
    Consume(String),

    #[error("failed to settle delivery {delivery_tag}: {reason}")]
    Acknowledge {
        delivery_tag: DeliveryTag,
        reason: String,
    },
}

impl BusError {
    /// Creates an ack/reject failure for the given tag.
    pub fn acknowledge(delivery_tag: DeliveryTag, reason: impl Into<String>) -> Self {
        BusError::Acknowledge {
            delivery_tag,
            reason: reason.into(),
        }
    }
}
