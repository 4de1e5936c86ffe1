//! MessageBusClient port - Interface the order service uses to announce orders.
//!
//! The order service calls this after an order has been stored. It does not
//! know whether the event goes to RabbitMQ or to an in-memory queue.

use async_trait::async_trait;

use crate::domain::foundation::PublishError;
use crate::domain::order::OrderEvent;

/// Port for publishing "order created" events.
///
/// Implementations must ensure:
/// - One call sends at most one message
/// - Failures to hand the message to the transport are returned, never retried
/// - No delivery confirmation is awaited; a successful return only means
///   the transport accepted the bytes
///
/// # Example
///
/// ```ignore
/// let event = OrderEvent::new(order.id, &order.product, order.quantity, order.user_id);
/// bus.publish_new_order(&event).await?;
/// ```
#[async_trait]
pub trait MessageBusClient: Send + Sync {
    /// Publish a single order event.
    async fn publish_new_order(&self, event: &OrderEvent) -> Result<(), PublishError>;
}
