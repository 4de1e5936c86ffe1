//! RabbitMQ implementation of [`MessageBusClient`].
//!
//! Events go through the default exchange straight to the configured queue.
//! The session is opened lazily on the first publish and kept for later
//! ones. A failed publish discards the session; the next call dials again,
//! once. There are no publisher confirms: success means the bytes were
//! handed to the channel.

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::BasicPublishOptions;
use lapin::BasicProperties;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::domain::foundation::PublishError;
use crate::domain::order::{codec, OrderEvent};
use crate::ports::{Dialer, MessageBusClient};

use super::connection::{LapinDialer, Session};
use super::topology::Topology;

/// A connection the publisher can send on.
#[async_trait]
pub trait PublishSession: Send + Sync {
    /// Declare the queue and hand `payload` to the broker.
    async fn publish(&self, topology: &Topology, payload: &[u8]) -> Result<(), PublishError>;

    /// Release the connection.
    async fn close(self);
}

#[async_trait]
impl PublishSession for Session {
    async fn publish(&self, topology: &Topology, payload: &[u8]) -> Result<(), PublishError> {
        let send = async {
            topology.declare_queue(self.channel()).await?;
            // The returned confirm is not awaited; confirms are not enabled.
            self.channel()
                .basic_publish(
                    "",
                    &topology.queue,
                    BasicPublishOptions::default(),
                    payload,
                    message_properties(),
                )
                .await?;
            Ok::<(), lapin::Error>(())
        };
        send.await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }

    async fn close(self) {
        Session::close(self).await;
    }
}

/// Publishes order events to RabbitMQ.
pub struct RabbitMqPublisher<D: Dialer = LapinDialer> {
    dialer: D,
    topology: Topology,
    session: Mutex<Option<D::Connection>>,
}

impl RabbitMqPublisher<LapinDialer> {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            LapinDialer::from_config(&config.rabbitmq),
            Topology::from_config(&config.rabbitmq, &config.consumer),
        )
    }
}

impl<D> RabbitMqPublisher<D>
where
    D: Dialer,
    D::Connection: PublishSession,
{
    pub fn new(dialer: D, topology: Topology) -> Self {
        Self {
            dialer,
            topology,
            session: Mutex::new(None),
        }
    }

    /// Close the cached session, if any.
    pub async fn close(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
        }
    }
}

#[async_trait]
impl<D> MessageBusClient for RabbitMqPublisher<D>
where
    D: Dialer,
    D::Connection: PublishSession,
{
    async fn publish_new_order(&self, event: &OrderEvent) -> Result<(), PublishError> {
        let payload = codec::encode(event)?;

        let mut cached = self.session.lock().await;
        let session = match cached.take() {
            Some(session) => session,
            None => self.dialer.dial().await?,
        };

        match session.publish(&self.topology, &payload).await {
            Ok(()) => {
                debug!(order_id = event.id, queue = %self.topology.queue, "Published order event");
                *cached = Some(session);
                Ok(())
            }
            Err(e) => {
                warn!(
                    order_id = event.id,
                    queue = %self.topology.queue,
                    error = %e,
                    "Failed to publish order event"
                );
                session.close().await;
                Err(e)
            }
        }
    }
}

fn message_properties() -> BasicProperties {
    let timestamp = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
    BasicProperties::default()
        .with_content_type(codec::CONTENT_TYPE.into())
        .with_message_id(Uuid::new_v4().to_string().into())
        .with_timestamp(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::DialError;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    /// What the fake broker saw, in order.
    #[derive(Clone, Default)]
    struct Wire {
        log: Arc<StdMutex<Vec<String>>>,
        fail_next_send: Arc<AtomicBool>,
        unreachable: Arc<AtomicBool>,
    }

    impl Wire {
        fn record(&self, line: String) {
            self.log.lock().unwrap().push(line);
        }

        fn lines(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    struct FakeDialer {
        wire: Wire,
        dials: AtomicU32,
    }

    #[async_trait]
    impl Dialer for FakeDialer {
        type Connection = FakeSession;

        async fn dial(&self) -> Result<FakeSession, DialError> {
            let id = self.dials.fetch_add(1, Ordering::SeqCst) + 1;
            self.wire.record(format!("dial {}", id));
            if self.wire.unreachable.load(Ordering::SeqCst) {
                return Err(DialError::Unreachable("connection refused".to_string()));
            }
            Ok(FakeSession {
                id,
                wire: self.wire.clone(),
            })
        }

        fn endpoint(&self) -> String {
            "test:5672".to_string()
        }
    }

    struct FakeSession {
        id: u32,
        wire: Wire,
    }

    #[async_trait]
    impl PublishSession for FakeSession {
        async fn publish(&self, topology: &Topology, _: &[u8]) -> Result<(), PublishError> {
            if self.wire.fail_next_send.swap(false, Ordering::SeqCst) {
                self.wire.record(format!("send {} failed", self.id));
                return Err(PublishError::Transport("channel closed".to_string()));
            }
            self.wire.record(format!("send {} to {}", self.id, topology.queue));
            Ok(())
        }

        async fn close(self) {
            self.wire.record(format!("close {}", self.id));
        }
    }

    fn publisher(wire: &Wire) -> RabbitMqPublisher<FakeDialer> {
        RabbitMqPublisher::new(
            FakeDialer {
                wire: wire.clone(),
                dials: AtomicU32::new(0),
            },
            Topology {
                exchange: "trigger".to_string(),
                queue: "orderQueue".to_string(),
                dead_letter_exchange: None,
            },
        )
    }

    fn order(id: i32) -> OrderEvent {
        OrderEvent::new(id, "Widget", 3, 7)
    }

    #[tokio::test]
    async fn session_is_dialed_once_and_reused() {
        let wire = Wire::default();
        let publisher = publisher(&wire);

        publisher.publish_new_order(&order(1)).await.unwrap();
        publisher.publish_new_order(&order(2)).await.unwrap();

        assert_eq!(
            wire.lines(),
            vec!["dial 1", "send 1 to orderQueue", "send 1 to orderQueue"]
        );
    }

    #[tokio::test]
    async fn failed_send_drops_session_and_next_publish_redials() {
        let wire = Wire::default();
        let publisher = publisher(&wire);
        wire.fail_next_send.store(true, Ordering::SeqCst);

        let failed = publisher.publish_new_order(&order(1)).await;
        let retried = publisher.publish_new_order(&order(1)).await;

        assert!(matches!(failed, Err(PublishError::Transport(_))));
        assert!(retried.is_ok());
        assert_eq!(
            wire.lines(),
            vec!["dial 1", "send 1 failed", "close 1", "dial 2", "send 2 to orderQueue"]
        );
    }

    #[tokio::test]
    async fn unreachable_broker_is_dialed_once_without_retry() {
        let wire = Wire::default();
        let publisher = publisher(&wire);
        wire.unreachable.store(true, Ordering::SeqCst);

        let result = publisher.publish_new_order(&order(1)).await;

        assert!(matches!(
            result,
            Err(PublishError::Unavailable(DialError::Unreachable(_)))
        ));
        assert_eq!(wire.lines(), vec!["dial 1"]);
    }

    #[tokio::test]
    async fn close_releases_the_cached_session() {
        let wire = Wire::default();
        let publisher = publisher(&wire);

        publisher.publish_new_order(&order(1)).await.unwrap();
        publisher.close().await;
        publisher.close().await;

        assert_eq!(wire.lines(), vec!["dial 1", "send 1 to orderQueue", "close 1"]);
    }

    #[test]
    fn messages_are_json_with_unique_ids() {
        let first = message_properties();
        let second = message_properties();

        assert_eq!(
            first.content_type().as_ref().map(|s| s.as_str()),
            Some("application/json")
        );
        assert!(first.message_id().is_some());
        assert_ne!(first.message_id(), second.message_id());
        assert!(first.timestamp().is_some());
    }

    #[test]
    fn messages_are_not_persistent() {
        // Delivery mode 2 would only matter for a durable queue.
        assert_eq!(*message_properties().delivery_mode(), None);
    }
}
