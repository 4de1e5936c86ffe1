//! The "order created" event carried from the order service to notifications.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::ValidationError;

/// Order event published after an order has been stored.
///
/// Serialized with PascalCase field names (`Id`, `Product`, `Quantity`,
/// `UserId`). Missing fields decode to their default values rather than
/// failing, so payloads from older or newer producers are accepted silently.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OrderEvent {
    pub id: i32,
    pub product: String,
    pub quantity: i32,
    pub user_id: i32,
}

impl OrderEvent {
    /// Creates a new order event.
    pub fn new(id: i32, product: impl Into<String>, quantity: i32, user_id: i32) -> Self {
        Self {
            id,
            product: product.into(),
            quantity,
            user_id,
        }
    }

    /// Checks the invariants a producer must uphold before publishing.
    ///
    /// The codec never calls this; a consumer may receive events that
    /// would fail validation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.product.trim().is_empty() {
            return Err(ValidationError::empty_field("Product"));
        }
        if self.quantity <= 0 {
            return Err(ValidationError::not_positive("Quantity", self.quantity));
        }
        if self.user_id <= 0 {
            return Err(ValidationError::not_positive("UserId", self.user_id));
        }
        Ok(())
    }
}
