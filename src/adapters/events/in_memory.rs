//! In-memory broker implementation for testing.
//!
//! Models one RabbitMQ queue with manual acknowledgement:
//! - FIFO delivery with increasing delivery tags starting at 1
//! - unacknowledged deliveries are held until acked or rejected
//! - reject with requeue puts the message back at the head of the queue,
//!   marked redelivered, with its delivery count incremented
//! - reject without requeue moves it to a dead-letter list
//!
//! Every ack and reject is recorded for assertions. This adapter is for
//! tests and local runs, not production.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::domain::foundation::{BusError, DeliveryTag, PublishError};
use crate::domain::order::{codec, OrderEvent};
use crate::ports::{Delivery, DeliveryAcker, DeliverySource, MessageBusClient};

/// A recorded reject call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub delivery_tag: DeliveryTag,
    pub requeue: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    payload: Vec<u8>,
    delivery_count: u32,
}

#[derive(Default)]
struct BrokerState {
    ready: VecDeque<QueuedMessage>,
    unacked: HashMap<DeliveryTag, QueuedMessage>,
    last_tag: DeliveryTag,
    published: usize,
    acked: Vec<DeliveryTag>,
    rejected: Vec<Rejection>,
    dead_lettered: Vec<Vec<u8>>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<BrokerState>,
    available: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory single-queue broker.
///
/// Cloning yields another handle to the same queue.
///
/// # Example
///
/// ```ignore
/// let broker = InMemoryBroker::new();
/// broker.publish_new_order(&event).await?;
///
/// let mut source = broker.subscribe();
/// let delivery = source.next_delivery().await.unwrap()?;
/// delivery.ack().await?;
///
/// assert_eq!(broker.acked(), vec![1]);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue raw bytes, bypassing the codec.
    pub fn publish_raw(&self, payload: impl Into<Vec<u8>>) {
        {
            let mut state = self.shared.state();
            state.published += 1;
            state.ready.push_back(QueuedMessage {
                payload: payload.into(),
                delivery_count: 0,
            });
        }
        self.shared.available.notify_one();
    }

    /// Subscribe to the queue.
    pub fn subscribe(&self) -> InMemoryDeliverySource {
        InMemoryDeliverySource {
            shared: Arc::clone(&self.shared),
            acker: Arc::new(InMemoryAcker {
                shared: Arc::clone(&self.shared),
            }),
        }
    }

    /// Cancel all subscriptions once the queue has been drained.
    pub fn close(&self) {
        self.shared.state().closed = true;
        self.shared.available.notify_waiters();
        self.shared.available.notify_one();
    }

    // === Test Helpers ===

    /// Tags acknowledged so far, in order.
    pub fn acked(&self) -> Vec<DeliveryTag> {
        self.shared.state().acked.clone()
    }

    /// Reject calls so far, in order.
    pub fn rejections(&self) -> Vec<Rejection> {
        self.shared.state().rejected.clone()
    }

    /// Payloads rejected without requeue.
    pub fn dead_lettered(&self) -> Vec<Vec<u8>> {
        self.shared.state().dead_lettered.clone()
    }

    /// Messages waiting to be delivered.
    pub fn ready_count(&self) -> usize {
        self.shared.state().ready.len()
    }

    /// Messages delivered but not yet settled.
    pub fn unacked_count(&self) -> usize {
        self.shared.state().unacked.len()
    }

    /// Messages published since creation.
    pub fn published_count(&self) -> usize {
        self.shared.state().published
    }
}

#[async_trait]
impl MessageBusClient for InMemoryBroker {
    async fn publish_new_order(&self, event: &OrderEvent) -> Result<(), PublishError> {
        let payload = codec::encode(event)?;
        self.publish_raw(payload);
        Ok(())
    }
}

/// Subscription handle returned by [`InMemoryBroker::subscribe`].
pub struct InMemoryDeliverySource {
    shared: Arc<Shared>,
    acker: Arc<InMemoryAcker>,
}

#[async_trait]
impl DeliverySource for InMemoryDeliverySource {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BusError>> {
        loop {
            {
                let mut state = self.shared.state();
                if let Some(message) = state.ready.pop_front() {
                    state.last_tag += 1;
                    let tag = state.last_tag;
                    let payload = message.payload.clone();
                    let count = message.delivery_count;
                    state.unacked.insert(tag, message);

                    let delivery = Delivery::new(tag, payload, self.acker.clone())
                        .with_redelivered(count > 0)
                        .with_delivery_count(count);
                    return Some(Ok(delivery));
                }
                if state.closed {
                    return None;
                }
            }
            self.shared.available.notified().await;
        }
    }
}

struct InMemoryAcker {
    shared: Arc<Shared>,
}

#[async_trait]
impl DeliveryAcker for InMemoryAcker {
    async fn ack(&self, delivery_tag: DeliveryTag) -> Result<(), BusError> {
        let mut state = self.shared.state();
        if state.unacked.remove(&delivery_tag).is_none() {
            return Err(BusError::acknowledge(delivery_tag, "unknown delivery tag"));
        }
        state.acked.push(delivery_tag);
        Ok(())
    }

    async fn reject(&self, delivery_tag: DeliveryTag, requeue: bool) -> Result<(), BusError> {
        {
            let mut state = self.shared.state();
            let Some(mut message) = state.unacked.remove(&delivery_tag) else {
                return Err(BusError::acknowledge(delivery_tag, "unknown delivery tag"));
            };
            state.rejected.push(Rejection {
                delivery_tag,
                requeue,
                payload: message.payload.clone(),
            });

            if requeue {
                message.delivery_count += 1;
                state.ready.push_front(message);
            } else {
                state.dead_lettered.push(message.payload);
                return Ok(());
            }
        }
        self.shared.available.notify_one();
        Ok(())
    }
}
