//! NotificationConsumer - Consume loop with a bounded worker pool.
//!
//! One receive loop pulls deliveries from a [`DeliverySource`] into a bounded
//! channel; `workers` workers drain it, run the handler and settle each
//! delivery exactly once:
//!
//! | Handler outcome | Settlement |
//! |-----------------|------------|
//! | `Ok(true)` | `ack(tag)` |
//! | `Ok(false)`, `Err(_)`, panic | `reject(tag, requeue = true)` |
//! | failure past the redelivery cap | `reject(tag, requeue = false)` |
//!
//! ## Graceful Shutdown
//!
//! When the shutdown signal flips to `true` the receive loop stops pulling.
//! Deliveries already accepted into the buffer are still processed and
//! settled before `run` returns. Deliveries the broker pushed but the loop
//! never accepted stay unacknowledged and are redelivered once the channel
//! closes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::ConsumerConfig;
use crate::domain::foundation::HandlerError;
use crate::ports::{Delivery, DeliverySource, MessageHandler};

use super::redelivery::{FailureAction, RedeliveryPolicy};

/// Observable lifecycle of the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Created, not running.
    Idle,
    /// Waiting on the source for the next delivery.
    AwaitingDelivery,
    /// The loop has ended.
    Stopped,
}

/// Why the consume loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown signal was raised (or its sender dropped).
    Shutdown,
    /// The source ended and could not be resumed.
    SourceClosed,
}

/// Totals for one call to [`NotificationConsumer::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    /// Rejected with requeue.
    pub rejected: u64,
    /// Rejected without requeue.
    pub dead_lettered: u64,
    /// Ack or reject calls the broker did not accept.
    pub settle_failures: u64,
    pub stopped_by: StopReason,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    acked: AtomicU64,
    rejected: AtomicU64,
    dead_lettered: AtomicU64,
    settle_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, stopped_by: StopReason) -> ConsumerStats {
        ConsumerStats {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            settle_failures: self.settle_failures.load(Ordering::Relaxed),
            stopped_by,
        }
    }
}

/// Runs a [`MessageHandler`] over every delivery of a source.
pub struct NotificationConsumer {
    handler: Arc<dyn MessageHandler>,
    workers: usize,
    redelivery: RedeliveryPolicy,
    state: watch::Sender<ConsumerState>,
}

impl NotificationConsumer {
    pub fn new(handler: Arc<dyn MessageHandler>, config: &ConsumerConfig) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            handler,
            workers: config.workers.max(1),
            redelivery: RedeliveryPolicy::new(config.max_redeliveries),
            state,
        }
    }

    /// Subscribe to state changes.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Consume until shutdown is signalled or the source ends.
    pub async fn run<S>(&self, source: &mut S, mut shutdown: watch::Receiver<bool>) -> ConsumerStats
    where
        S: DeliverySource + ?Sized,
    {
        let counters = Counters::default();

        if *shutdown.borrow_and_update() {
            self.state.send_replace(ConsumerState::Stopped);
            return counters.snapshot(StopReason::Shutdown);
        }

        info!(
            handler = self.handler.name(),
            workers = self.workers,
            max_redeliveries = ?self.redelivery.max_redeliveries(),
            "Waiting for messages"
        );

        let (tx, rx) = mpsc::channel::<Delivery>(self.workers);
        let rx = Mutex::new(rx);

        let receive = async {
            let tx = tx;
            loop {
                self.state.send_replace(ConsumerState::AwaitingDelivery);
                tokio::select! {
                    biased;

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Shutdown requested, draining accepted deliveries");
                            break StopReason::Shutdown;
                        }
                    }

                    next = source.next_delivery() => match next {
                        Some(Ok(delivery)) => {
                            Counters::bump(&counters.received);
                            if tx.send(delivery).await.is_err() {
                                break StopReason::Shutdown;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Failed to receive delivery");
                        }
                        None => {
                            warn!("Delivery source closed");
                            break StopReason::SourceClosed;
                        }
                    },
                }
            }
        };

        let workers = join_all((0..self.workers).map(|id| self.worker(id, &rx, &counters)));
        let (stopped_by, _) = tokio::join!(receive, workers);

        self.state.send_replace(ConsumerState::Stopped);
        let stats = counters.snapshot(stopped_by);
        info!(
            received = stats.received,
            acked = stats.acked,
            rejected = stats.rejected,
            dead_lettered = stats.dead_lettered,
            settle_failures = stats.settle_failures,
            "Consumer stopped"
        );
        stats
    }

    async fn worker(&self, id: usize, rx: &Mutex<mpsc::Receiver<Delivery>>, counters: &Counters) {
        loop {
            let next = rx.lock().await.recv().await;
            let Some(delivery) = next else {
                debug!(worker = id, "Worker finished");
                return;
            };
            self.handle(id, delivery, counters).await;
        }
    }

    async fn handle(&self, worker: usize, delivery: Delivery, counters: &Counters) {
        let tag = delivery.delivery_tag;
        debug!(
            worker,
            delivery_tag = tag,
            redelivered = delivery.redelivered,
            "Processing delivery"
        );

        let outcome = AssertUnwindSafe(self.handler.process_message(&delivery.payload))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

        let succeeded = match outcome {
            Ok(succeeded) => succeeded,
            Err(e) => {
                warn!(
                    handler = self.handler.name(),
                    delivery_tag = tag,
                    error = %e,
                    "Handler failed"
                );
                false
            }
        };

        if succeeded {
            self.redelivery.on_success(&delivery);
            debug!(worker, delivery_tag = tag, "Acking delivery");
            match delivery.ack().await {
                Ok(()) => Counters::bump(&counters.acked),
                Err(e) => {
                    error!(delivery_tag = tag, error = %e, "Failed to acknowledge delivery");
                    Counters::bump(&counters.settle_failures);
                }
            }
            return;
        }

        let requeue = match self.redelivery.on_failure(&delivery) {
            FailureAction::Requeue => true,
            FailureAction::DeadLetter { redeliveries } => {
                warn!(
                    delivery_tag = tag,
                    redeliveries, "Redelivery limit reached, rejecting without requeue"
                );
                false
            }
        };

        debug!(worker, delivery_tag = tag, requeue, "Rejecting delivery");
        match delivery.reject(requeue).await {
            Ok(()) if requeue => Counters::bump(&counters.rejected),
            Ok(()) => Counters::bump(&counters.dead_lettered),
            Err(e) => {
                error!(delivery_tag = tag, requeue, error = %e, "Failed to reject delivery");
                Counters::bump(&counters.settle_failures);
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
