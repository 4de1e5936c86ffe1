//! ValidatingPublisher - Refuses invalid order events before they reach the bus.
//!
//! The order service calls `publish_new_order` right after storing an
//! order. Validation lives here, on the producing side; consumers accept
//! whatever decodes.
//!
//! ## Usage
//!
//! ```ignore
//! let bus = ValidatingPublisher::new(RabbitMqPublisher::from_config(&config));
//! bus.publish_new_order(&OrderEvent::new(order.id, &order.product, order.quantity, order.user_id)).await?;
//! ```

use async_trait::async_trait;
use tracing::warn;

use crate::domain::foundation::PublishError;
use crate::domain::order::OrderEvent;
use crate::ports::MessageBusClient;

/// Decorates any `MessageBusClient` with event validation.
pub struct ValidatingPublisher<P: MessageBusClient> {
    inner: P,
}

impl<P: MessageBusClient> ValidatingPublisher<P> {
    /// Create a new ValidatingPublisher wrapping the given client.
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    /// The wrapped client.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: MessageBusClient> MessageBusClient for ValidatingPublisher<P> {
    async fn publish_new_order(&self, event: &OrderEvent) -> Result<(), PublishError> {
        if let Err(e) = event.validate() {
            warn!(order_id = event.id, error = %e, "Refusing to publish invalid order event");
            return Err(e.into());
        }

        self.inner.publish_new_order(event).await
    }
}
