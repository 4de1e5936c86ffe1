//! Settles deliveries on the channel they arrived on.

use async_trait::async_trait;
use lapin::options::{BasicAckOptions, BasicRejectOptions};
use lapin::Channel;
use tokio::sync::Mutex;

use crate::domain::foundation::{BusError, DeliveryTag};
use crate::ports::DeliveryAcker;

/// Acknowledges and rejects through one channel.
///
/// Workers settle concurrently; the lock keeps channel calls serialized.
pub struct ChannelAcker {
    channel: Mutex<Channel>,
}

impl ChannelAcker {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel: Mutex::new(channel),
        }
    }
}

#[async_trait]
impl DeliveryAcker for ChannelAcker {
    async fn ack(&self, delivery_tag: DeliveryTag) -> Result<(), BusError> {
        let channel = self.channel.lock().await;
        channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|e| BusError::acknowledge(delivery_tag, e.to_string()))
    }

    async fn reject(&self, delivery_tag: DeliveryTag, requeue: bool) -> Result<(), BusError> {
        let channel = self.channel.lock().await;
        channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| BusError::acknowledge(delivery_tag, e.to_string()))
    }
}
