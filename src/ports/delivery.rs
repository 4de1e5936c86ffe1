//! Delivery ports - where consumed messages come from and how they are settled.
//!
//! A [`Delivery`] is owned by exactly one worker from receipt until it is
//! acknowledged or rejected. Settling consumes the value, so a tag can not be
//! answered twice or retained afterwards.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::foundation::{BusError, DeliveryTag};

/// Broker side of settling a delivery.
///
/// An acker is bound to the channel that produced the delivery; tags are
/// only meaningful on that channel.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    /// Acknowledge exactly this delivery (never cumulative).
    async fn ack(&self, delivery_tag: DeliveryTag) -> Result<(), BusError>;

    /// Reject exactly this delivery, optionally asking the broker to requeue it.
    async fn reject(&self, delivery_tag: DeliveryTag, requeue: bool) -> Result<(), BusError>;
}

/// A stream of deliveries from one subscription.
#[async_trait]
pub trait DeliverySource: Send {
    /// Wait for the next delivery.
    ///
    /// `None` means the subscription is gone for good. `Some(Err(_))` is a
    /// transient failure; the caller may keep polling. Must be cancel-safe.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BusError>>;
}

/// One message handed to the consumer, with its tag and raw payload.
pub struct Delivery {
    pub delivery_tag: DeliveryTag,
    pub payload: Vec<u8>,
    /// Broker flag: this message was delivered before.
    pub redelivered: bool,
    /// Prior deliveries as reported by the broker (`x-delivery-count`), if any.
    pub delivery_count: Option<u32>,
    acker: Arc<dyn DeliveryAcker>,
}

impl Delivery {
    /// Creates a first-time delivery settled through `acker`.
    pub fn new(delivery_tag: DeliveryTag, payload: Vec<u8>, acker: Arc<dyn DeliveryAcker>) -> Self {
        Self {
            delivery_tag,
            payload,
            redelivered: false,
            delivery_count: None,
            acker,
        }
    }

    /// Marks the delivery as redelivered.
    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    /// Attaches the broker's delivery count.
    pub fn with_delivery_count(mut self, count: u32) -> Self {
        self.delivery_count = Some(count);
        self
    }

    /// Acknowledge this delivery.
    pub async fn ack(self) -> Result<(), BusError> {
        self.acker.ack(self.delivery_tag).await
    }

    /// Reject this delivery.
    pub async fn reject(self, requeue: bool) -> Result<(), BusError> {
        self.acker.reject(self.delivery_tag, requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("payload_len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .field("delivery_count", &self.delivery_count)
            .finish()
    }
}
