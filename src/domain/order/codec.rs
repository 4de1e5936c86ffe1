//! Wire codec for [`OrderEvent`].
//!
//! Payloads are UTF-8 JSON objects:
//!
//! ```text
//! {"Id":1,"Product":"Widget","Quantity":3,"UserId":7}
//! ```
//!
//! There is no schema version. Unknown fields are ignored and absent fields
//! take their default value.

use crate::domain::foundation::{DecodeError, PublishError};

use super::OrderEvent;

/// Content type set on every published message.
pub const CONTENT_TYPE: &str = "application/json";

/// Serializes an event into its wire payload.
pub fn encode(event: &OrderEvent) -> Result<Vec<u8>, PublishError> {
    serde_json::to_vec(event).map_err(|e| PublishError::Encode(e.to_string()))
}

/// Parses a wire payload back into an event.
///
/// Fails with [`DecodeError`] on invalid UTF-8, malformed JSON, a JSON value
/// that is not an object, or a field holding the wrong type.
pub fn decode(payload: &[u8]) -> Result<OrderEvent, DecodeError> {
    Ok(serde_json::from_slice(payload)?)
}
