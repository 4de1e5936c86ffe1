//! MessageHandler port - Interface for processing one delivered payload.

use async_trait::async_trait;

use crate::domain::foundation::HandlerError;

/// Handler invoked once per delivery by the consume loop.
///
/// The outcome decides what happens to the delivery:
/// - `Ok(true)` - acknowledged and removed from the queue
/// - `Ok(false)` or `Err(_)` - rejected with requeue
///
/// Implementations should be:
/// - **Idempotent** - a rejected message comes back, possibly to another consumer
/// - **Self-contained** - the payload slice must not be retained after returning
///
/// # Example
///
/// ```ignore
/// struct AuditLogger;
///
/// #[async_trait]
/// impl MessageHandler for AuditLogger {
///     async fn process_message(&self, payload: &[u8]) -> Result<bool, HandlerError> {
///         let event = codec::decode(payload)?;
///         tracing::info!(order_id = event.id, "audited");
///         Ok(true)
///     }
///
///     fn name(&self) -> &'static str {
///         "AuditLogger"
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process the raw payload of one delivery.
    async fn process_message(&self, payload: &[u8]) -> Result<bool, HandlerError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}
