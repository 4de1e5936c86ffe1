//! Integration tests for the order event pipeline.
//!
//! These tests verify the end-to-end flow:
//! 1. The order side publishes an "order created" event
//! 2. NotificationConsumer pulls it from the queue
//! 3. NotificationHandler decodes it and logs the notification
//! 4. The delivery is acknowledged, or rejected with requeue on failure
//!
//! Uses the in-memory broker to test the flow without a running RabbitMQ.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use order_events::adapters::{InMemoryBroker, InMemoryDeliverySource};
use order_events::application::{
    ConsumerStats, NotificationConsumer, NotificationHandler, StopReason, ValidatingPublisher,
};
use order_events::config::ConsumerConfig;
use order_events::domain::foundation::PublishError;
use order_events::domain::order::{codec, OrderEvent};
use order_events::ports::MessageBusClient;

// =============================================================================
// Test Infrastructure
// =============================================================================

struct RunningConsumer {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<ConsumerStats>,
}

impl RunningConsumer {
    fn start(broker: &InMemoryBroker, config: ConsumerConfig) -> Self {
        let consumer = NotificationConsumer::new(Arc::new(NotificationHandler::new()), &config);
        let mut source: InMemoryDeliverySource = broker.subscribe();
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(async move { consumer.run(&mut source, rx).await });
        Self { shutdown, task }
    }

    async fn stop(self) -> ConsumerStats {
        self.shutdown.send(true).expect("consumer already gone");
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("consumer did not stop")
            .expect("consumer task panicked")
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within two seconds");
}

fn single_worker() -> ConsumerConfig {
    ConsumerConfig {
        workers: 1,
        ..Default::default()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn published_order_is_consumed_and_acked() {
    let broker = InMemoryBroker::new();
    let consumer = RunningConsumer::start(&broker, single_worker());

    broker
        .publish_new_order(&OrderEvent::new(1, "Widget", 3, 7))
        .await
        .unwrap();

    let observed = broker.clone();
    eventually(|| observed.acked().len() == 1).await;
    let stats = consumer.stop().await;

    assert_eq!(broker.acked(), vec![1]);
    assert!(broker.rejections().is_empty());
    assert_eq!(stats.received, 1);
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.stopped_by, StopReason::Shutdown);
}

#[tokio::test]
async fn every_order_in_a_burst_is_acked_once() {
    let broker = InMemoryBroker::new();
    for id in 1..=20 {
        broker
            .publish_new_order(&OrderEvent::new(id, "Gadget", id, 42))
            .await
            .unwrap();
    }
    broker.close();
    let consumer = NotificationConsumer::new(
        Arc::new(NotificationHandler::new()),
        &ConsumerConfig::default(),
    );
    let (_tx, rx) = watch::channel(false);

    let stats = consumer.run(&mut broker.subscribe(), rx).await;

    let mut acked = broker.acked();
    acked.sort_unstable();
    assert_eq!(acked, (1..=20).collect::<Vec<u64>>());
    assert_eq!(stats.acked, 20);
    assert_eq!(stats.stopped_by, StopReason::SourceClosed);
    assert_eq!(broker.unacked_count(), 0);
}

#[tokio::test]
async fn malformed_payload_is_requeued_and_redelivered() {
    let broker = InMemoryBroker::new();
    let consumer = RunningConsumer::start(&broker, single_worker());

    broker.publish_raw(r#"{"Id":1,"Product":"#);

    let observed = broker.clone();
    eventually(|| observed.rejections().len() >= 2).await;
    let stats = consumer.stop().await;

    let rejections = broker.rejections();
    assert!(rejections.iter().all(|r| r.requeue));
    assert!(rejections
        .iter()
        .all(|r| r.payload == br#"{"Id":1,"Product":"#.to_vec()));
    assert!(broker.acked().is_empty());
    assert!(broker.dead_lettered().is_empty());
    assert_eq!(stats.rejected as usize, rejections.len());
}

#[tokio::test]
async fn poison_message_does_not_block_later_orders_for_good() {
    let broker = InMemoryBroker::new();
    let config = ConsumerConfig {
        workers: 1,
        max_redeliveries: Some(3),
        ..Default::default()
    };
    let consumer = RunningConsumer::start(&broker, config);

    broker.publish_raw("not json");
    broker
        .publish_new_order(&OrderEvent::new(2, "Widget", 1, 7))
        .await
        .unwrap();

    let observed = broker.clone();
    eventually(|| observed.acked().len() == 1).await;
    let stats = consumer.stop().await;

    assert_eq!(broker.dead_lettered(), vec![b"not json".to_vec()]);
    assert_eq!(stats.rejected, 3);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.acked, 1);
}

#[tokio::test]
async fn message_with_missing_fields_is_acked_with_defaults() {
    let broker = InMemoryBroker::new();
    let consumer = RunningConsumer::start(&broker, single_worker());

    broker.publish_raw(r#"{"Id":9,"Product":"Widget"}"#);

    let observed = broker.clone();
    eventually(|| observed.acked().len() == 1).await;
    consumer.stop().await;

    assert!(broker.rejections().is_empty());
}

#[tokio::test]
async fn validating_publisher_keeps_invalid_orders_off_the_queue() {
    let broker = InMemoryBroker::new();
    let publisher = ValidatingPublisher::new(broker.clone());

    let blank = publisher
        .publish_new_order(&OrderEvent::new(1, "  ", 1, 7))
        .await;
    let valid = publisher
        .publish_new_order(&OrderEvent::new(2, "Widget", 1, 7))
        .await;

    assert!(matches!(blank, Err(PublishError::Invalid(_))));
    assert!(valid.is_ok());
    assert_eq!(broker.published_count(), 1);

    let mut source = broker.subscribe();
    let delivery = order_events::ports::DeliverySource::next_delivery(&mut source)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        codec::decode(&delivery.payload).unwrap(),
        OrderEvent::new(2, "Widget", 1, 7)
    );
}
