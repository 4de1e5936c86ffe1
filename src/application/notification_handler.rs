//! NotificationHandler - Turns an "order created" delivery into a notification.
//!
//! Sending the notification is simulated by an info log record carrying
//! every field of the order.

use async_trait::async_trait;
use tracing::{error, info};

use crate::domain::foundation::HandlerError;
use crate::domain::order::codec;
use crate::ports::MessageHandler;

/// Handles order events delivered to the notification service.
///
/// Returns `Ok(false)` for payloads that do not decode, so the delivery is
/// rejected instead of acknowledged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotificationHandler;

impl NotificationHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageHandler for NotificationHandler {
    async fn process_message(&self, payload: &[u8]) -> Result<bool, HandlerError> {
        let event = match codec::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, payload_len = payload.len(), "Error processing message");
                return Ok(false);
            }
        };

        info!(
            order_id = event.id,
            product = %event.product,
            quantity = event.quantity,
            user_id = event.user_id,
            "Order Received: {}, {}, {}, {}",
            event.id,
            event.product,
            event.quantity,
            event.user_id
        );

        Ok(true)
    }

    fn name(&self) -> &'static str {
        "NotificationHandler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderEvent;
    use crate::test_support::CapturedLogs;

    #[tokio::test]
    async fn valid_order_is_logged_and_succeeds() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();
        let payload = codec::encode(&OrderEvent::new(1, "Widget", 3, 7)).unwrap();

        let outcome = NotificationHandler::new().process_message(&payload).await;

        assert!(matches!(outcome, Ok(true)));
        let contents = logs.contents();
        let line = contents
            .lines()
            .find(|l| l.contains("Order Received"))
            .expect("no order record logged");
        assert!(line.contains("INFO"));
        assert!(line.contains("Order Received: 1, Widget, 3, 7"));
    }

    #[tokio::test]
    async fn malformed_payload_reports_failure() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let outcome = NotificationHandler::new()
            .process_message(b"{\"Id\":1,")
            .await;

        assert!(matches!(outcome, Ok(false)));
        assert_eq!(logs.count_lines_containing("Error processing message"), 1);
        assert_eq!(logs.count_lines_containing("Order Received"), 0);
    }

    #[tokio::test]
    async fn payload_with_missing_fields_still_succeeds() {
        // No schema check: absent fields arrive as defaults.
        let outcome = NotificationHandler::new()
            .process_message(br#"{"Id":5}"#)
            .await;

        assert!(matches!(outcome, Ok(true)));
    }
}
