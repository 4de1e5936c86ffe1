//! RabbitMQ subscription feeding the consume loop.
//!
//! The subscription uses manual acknowledgement: the broker keeps every
//! delivery until it is explicitly acked or rejected.
//!
//! ## Recovery
//!
//! When the delivery stream fails or ends (connection dropped, channel
//! closed by the broker), the source asks its [`Subscriber`] for a new
//! subscription every `recovery_interval` until one succeeds. Each attempt
//! dials a new connection and re-declares the topology. The consume loop only
//! sees a pause in deliveries. Deliveries still held by workers belong to
//! the dead channel; their ack/reject fails and the broker redelivers them.
//!
//! With recovery disabled the source ends instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicQosOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::BasicProperties;
use tracing::{info, warn};

use crate::config::{AppConfig, ConsumerConfig};
use crate::domain::foundation::BusError;
use crate::ports::{Delivery, DeliverySource, Dialer};

use super::acker::ChannelAcker;
use super::connection::{LapinDialer, Session};
use super::topology::Topology;

/// Header quorum queues use to report previous delivery attempts.
pub const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

/// Subscription options.
#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    pub consumer_tag: String,
    pub prefetch_count: u16,
    pub recovery_interval: Option<Duration>,
}

impl SubscriptionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.consumer, config.rabbitmq.recovery_interval())
    }

    pub fn new(consumer: &ConsumerConfig, recovery_interval: Option<Duration>) -> Self {
        Self {
            consumer_tag: consumer.consumer_tag.clone(),
            prefetch_count: consumer.prefetch_count,
            recovery_interval,
        }
    }
}

/// Opens subscriptions for [`RabbitMqDeliverySource`], initially and on recovery.
#[async_trait]
pub trait Subscriber: Send + Sync {
    type Subscription: Subscription;

    /// Connect once, declare the topology and start consuming.
    async fn subscribe(&self) -> Result<Self::Subscription, BusError>;

    /// Queue name, for logs.
    fn queue(&self) -> &str;
}

/// One live consumer on one channel.
#[async_trait]
pub trait Subscription: Send {
    /// Next delivery; `None` when the broker cancelled the consumer.
    async fn next(&mut self) -> Option<Result<Delivery, BusError>>;

    /// Release the channel and connection.
    async fn close(self);
}

/// Subscribes with a fresh `lapin` connection per call.
pub struct LapinSubscriber {
    dialer: LapinDialer,
    topology: Topology,
    options: SubscriptionOptions,
}

impl LapinSubscriber {
    pub fn new(dialer: LapinDialer, topology: Topology, options: SubscriptionOptions) -> Self {
        Self {
            dialer,
            topology,
            options,
        }
    }
}

#[async_trait]
impl Subscriber for LapinSubscriber {
    type Subscription = LapinSubscription;

    async fn subscribe(&self) -> Result<LapinSubscription, BusError> {
        let session = self.dialer.dial().await?;
        LapinSubscription::open(session, &self.topology, &self.options).await
    }

    fn queue(&self) -> &str {
        &self.topology.queue
    }
}

/// A manual-ack `lapin` consumer and the session it runs on.
pub struct LapinSubscription {
    session: Session,
    consumer: lapin::Consumer,
    acker: Arc<ChannelAcker>,
}

impl LapinSubscription {
    async fn open(
        session: Session,
        topology: &Topology,
        options: &SubscriptionOptions,
    ) -> Result<Self, BusError> {
        match Self::consume(&session, topology, options).await {
            Ok(consumer) => {
                let acker = Arc::new(ChannelAcker::new(session.channel().clone()));
                Ok(Self {
                    session,
                    consumer,
                    acker,
                })
            }
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    async fn consume(
        session: &Session,
        topology: &Topology,
        options: &SubscriptionOptions,
    ) -> Result<lapin::Consumer, BusError> {
        let channel = session.channel();
        topology
            .declare_consumer_side(channel)
            .await
            .map_err(|e| BusError::Topology(e.to_string()))?;
        channel
            .basic_qos(options.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Topology(e.to_string()))?;

        channel
            .basic_consume(
                &topology.queue,
                &options.consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Consume(e.to_string()))
    }
}

#[async_trait]
impl Subscription for LapinSubscription {
    async fn next(&mut self) -> Option<Result<Delivery, BusError>> {
        let acker = Arc::clone(&self.acker);
        match self.consumer.next().await? {
            Ok(delivery) => Some(Ok(into_delivery(delivery, acker))),
            Err(e) => Some(Err(BusError::Consume(e.to_string()))),
        }
    }

    async fn close(self) {
        self.session.close().await;
    }
}

/// Deliveries from the configured queue, with transparent recovery.
pub struct RabbitMqDeliverySource<S: Subscriber = LapinSubscriber> {
    subscriber: S,
    recovery_interval: Option<Duration>,
    active: Option<S::Subscription>,
}

impl RabbitMqDeliverySource<LapinSubscriber> {
    /// Declare the topology on `session` and start consuming.
    ///
    /// `dialer` is used for recovery after the session is lost.
    pub async fn subscribe(
        session: Session,
        dialer: LapinDialer,
        topology: Topology,
        options: SubscriptionOptions,
    ) -> Result<Self, BusError> {
        let subscription = LapinSubscription::open(session, &topology, &options).await?;
        info!(
            queue = %topology.queue,
            exchange = %topology.exchange,
            dead_letter_exchange = topology.dead_letter_exchange.as_deref().unwrap_or("-"),
            consumer_tag = %options.consumer_tag,
            "Subscribed to RabbitMQ queue"
        );

        let recovery_interval = options.recovery_interval;
        Ok(Self::new(
            LapinSubscriber::new(dialer, topology, options),
            subscription,
            recovery_interval,
        ))
    }
}

impl<S: Subscriber> RabbitMqDeliverySource<S> {
    /// Source reading from `subscription`; `subscriber` replaces it after a
    /// failure unless `recovery_interval` is `None`.
    pub fn new(
        subscriber: S,
        subscription: S::Subscription,
        recovery_interval: Option<Duration>,
    ) -> Self {
        Self {
            subscriber,
            recovery_interval,
            active: Some(subscription),
        }
    }

    /// Close the channel and connection. The source yields nothing afterwards.
    pub async fn close(&mut self) {
        self.recovery_interval = None;
        self.drop_subscription().await;
    }

    async fn recover(&mut self, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;

            match self.subscriber.subscribe().await {
                Ok(subscription) => {
                    info!(queue = %self.subscriber.queue(), "RabbitMQ connection recovered");
                    self.active = Some(subscription);
                    return;
                }
                Err(e) => {
                    warn!(
                        queue = %self.subscriber.queue(),
                        retry_in_ms = interval.as_millis() as u64,
                        error = %e,
                        "RabbitMQ recovery attempt failed"
                    );
                }
            }
        }
    }

    async fn drop_subscription(&mut self) {
        if let Some(subscription) = self.active.take() {
            subscription.close().await;
        }
    }
}

#[async_trait]
impl<S: Subscriber> DeliverySource for RabbitMqDeliverySource<S> {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BusError>> {
        loop {
            if self.active.is_none() {
                let interval = self.recovery_interval?;
                self.recover(interval).await;
            }

            let Some(subscription) = self.active.as_mut() else {
                continue;
            };

            match subscription.next().await {
                Some(Ok(delivery)) => return Some(Ok(delivery)),
                Some(Err(e)) => {
                    warn!(error = %e, queue = %self.subscriber.queue(), "RabbitMQ delivery stream failed");
                    self.drop_subscription().await;
                    if self.recovery_interval.is_none() {
                        return Some(Err(e));
                    }
                }
                None => {
                    warn!(queue = %self.subscriber.queue(), "RabbitMQ consumer was cancelled");
                    self.drop_subscription().await;
                }
            }
        }
    }
}

fn into_delivery(delivery: lapin::message::Delivery, acker: Arc<ChannelAcker>) -> Delivery {
    let count = delivery_count(&delivery.properties);
    let converted = Delivery::new(delivery.delivery_tag, delivery.data, acker)
        .with_redelivered(delivery.redelivered);

    match count {
        Some(count) => converted.with_delivery_count(count),
        None => converted,
    }
}

/// Read `x-delivery-count` from the message headers.
fn delivery_count(properties: &BasicProperties) -> Option<u32> {
    let headers = properties.headers().as_ref()?;
    let (_, value) = headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == DELIVERY_COUNT_HEADER)?;

    match value {
        AMQPValue::LongLongInt(n) => u32::try_from(*n).ok(),
        AMQPValue::LongInt(n) => u32::try_from(*n).ok(),
        AMQPValue::LongUInt(n) => Some(*n),
        AMQPValue::ShortInt(n) => u32::try_from(*n).ok(),
        AMQPValue::ShortUInt(n) => Some(u32::from(*n)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{DeliveryTag, DialError};
    use crate::ports::DeliveryAcker;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct NoopAcker;

    #[async_trait]
    impl DeliveryAcker for NoopAcker {
        async fn ack(&self, _: DeliveryTag) -> Result<(), BusError> {
            Ok(())
        }

        async fn reject(&self, _: DeliveryTag, _: bool) -> Result<(), BusError> {
            Ok(())
        }
    }

    fn delivery(tag: DeliveryTag) -> Result<Delivery, BusError> {
        Ok(Delivery::new(tag, b"{}".to_vec(), Arc::new(NoopAcker)))
    }

    fn stream_failure() -> Result<Delivery, BusError> {
        Err(BusError::Consume("connection reset by peer".to_string()))
    }

    /// Plays back a fixed list of stream items, then reports cancellation.
    struct ScriptedSubscription {
        items: VecDeque<Result<Delivery, BusError>>,
        closed: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Subscription for ScriptedSubscription {
        async fn next(&mut self) -> Option<Result<Delivery, BusError>> {
            self.items.pop_front()
        }

        async fn close(self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Answers subscribe calls from a script; unreachable once it runs out.
    #[derive(Default)]
    struct ScriptedSubscriber {
        attempts: Mutex<VecDeque<Result<ScriptedSubscription, BusError>>>,
        subscribes: AtomicU32,
        closed: Arc<AtomicU32>,
    }

    impl ScriptedSubscriber {
        fn subscription(
            &self,
            items: Vec<Result<Delivery, BusError>>,
        ) -> ScriptedSubscription {
            ScriptedSubscription {
                items: items.into(),
                closed: Arc::clone(&self.closed),
            }
        }

        fn then_unreachable(self) -> Self {
            self.attempts
                .lock()
                .unwrap()
                .push_back(Err(DialError::Unreachable("connection refused".into()).into()));
            self
        }

        fn then_subscribed(self, items: Vec<Result<Delivery, BusError>>) -> Self {
            let subscription = self.subscription(items);
            self.attempts.lock().unwrap().push_back(Ok(subscription));
            self
        }

        fn subscribes(&self) -> u32 {
            self.subscribes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Subscriber for Arc<ScriptedSubscriber> {
        type Subscription = ScriptedSubscription;

        async fn subscribe(&self) -> Result<ScriptedSubscription, BusError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            self.attempts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(DialError::Unreachable("script exhausted".into()).into()))
        }

        fn queue(&self) -> &str {
            "orderQueue"
        }
    }

    async fn next_tag<S: Subscriber>(source: &mut RabbitMqDeliverySource<S>) -> DeliveryTag {
        tokio::time::timeout(Duration::from_secs(2), source.next_delivery())
            .await
            .expect("no delivery within two seconds")
            .expect("source ended")
            .expect("delivery failed")
            .delivery_tag
    }

    #[tokio::test]
    async fn stream_failure_resubscribes_after_each_interval() {
        let subscriber = Arc::new(
            ScriptedSubscriber::default()
                .then_unreachable()
                .then_subscribed(vec![delivery(2)]),
        );
        let initial = subscriber.subscription(vec![delivery(1), stream_failure()]);
        let mut source = RabbitMqDeliverySource::new(
            Arc::clone(&subscriber),
            initial,
            Some(Duration::from_millis(10)),
        );

        assert_eq!(next_tag(&mut source).await, 1);
        let started = std::time::Instant::now();
        assert_eq!(next_tag(&mut source).await, 2);

        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(subscriber.subscribes(), 2);
        assert_eq!(subscriber.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_consumer_is_resubscribed() {
        let subscriber = Arc::new(ScriptedSubscriber::default().then_subscribed(vec![delivery(5)]));
        let initial = subscriber.subscription(Vec::new());
        let mut source = RabbitMqDeliverySource::new(
            Arc::clone(&subscriber),
            initial,
            Some(Duration::from_millis(10)),
        );

        assert_eq!(next_tag(&mut source).await, 5);
        assert_eq!(subscriber.subscribes(), 1);
    }

    #[tokio::test]
    async fn without_recovery_a_stream_failure_ends_the_source() {
        let subscriber = Arc::new(ScriptedSubscriber::default().then_subscribed(vec![delivery(9)]));
        let initial = subscriber.subscription(vec![delivery(1), stream_failure()]);
        let mut source = RabbitMqDeliverySource::new(Arc::clone(&subscriber), initial, None);

        assert_eq!(next_tag(&mut source).await, 1);
        assert!(matches!(
            source.next_delivery().await,
            Some(Err(BusError::Consume(_)))
        ));
        assert!(source.next_delivery().await.is_none());
        assert_eq!(subscriber.subscribes(), 0);
        assert_eq!(subscriber.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_source_yields_nothing() {
        let subscriber = Arc::new(ScriptedSubscriber::default().then_subscribed(vec![delivery(9)]));
        let initial = subscriber.subscription(vec![delivery(1)]);
        let mut source = RabbitMqDeliverySource::new(
            Arc::clone(&subscriber),
            initial,
            Some(Duration::from_millis(10)),
        );

        source.close().await;

        assert!(source.next_delivery().await.is_none());
        assert_eq!(subscriber.subscribes(), 0);
        assert_eq!(subscriber.closed.load(Ordering::SeqCst), 1);
    }

    fn with_header(value: AMQPValue) -> BasicProperties {
        let mut headers = FieldTable::default();
        headers.insert(DELIVERY_COUNT_HEADER.into(), value);
        BasicProperties::default().with_headers(headers)
    }

    #[test]
    fn delivery_count_absent_without_headers() {
        assert_eq!(delivery_count(&BasicProperties::default()), None);
    }

    #[test]
    fn delivery_count_read_from_long_long_int() {
        assert_eq!(delivery_count(&with_header(AMQPValue::LongLongInt(3))), Some(3));
    }

    #[test]
    fn delivery_count_read_from_long_int() {
        assert_eq!(delivery_count(&with_header(AMQPValue::LongInt(2))), Some(2));
    }

    #[test]
    fn negative_delivery_count_is_ignored() {
        assert_eq!(delivery_count(&with_header(AMQPValue::LongLongInt(-1))), None);
    }

    #[test]
    fn other_headers_are_ignored() {
        let mut headers = FieldTable::default();
        headers.insert("x-first-death-reason".into(), AMQPValue::Boolean(true));
        let properties = BasicProperties::default().with_headers(headers);

        assert_eq!(delivery_count(&properties), None);
    }

    #[test]
    fn subscription_options_from_config() {
        let consumer = ConsumerConfig::default();
        let options = SubscriptionOptions::new(&consumer, Some(Duration::from_secs(10)));

        assert_eq!(options.consumer_tag, "notification-service");
        assert_eq!(options.prefetch_count, 16);
        assert_eq!(options.recovery_interval, Some(Duration::from_secs(10)));
    }
}
