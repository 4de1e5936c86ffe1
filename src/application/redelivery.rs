//! Optional cap on how often a failing message is requeued.
//!
//! Without a cap a message that always fails is requeued forever. With
//! `max_redeliveries = n`, a failure on a delivery that has already been
//! redelivered `n` times is rejected without requeue, which lets the broker
//! dead-letter it (or drop it when no dead-letter exchange is set).
//!
//! The redelivery count comes from the broker's `x-delivery-count` header
//! when present. Classic queues do not send it; for those, failures are
//! counted locally per payload fingerprint (SHA-256). The local count only
//! sees redeliveries that reach this process.

use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::ports::Delivery;

/// Upper bound on locally tracked fingerprints.
const MAX_TRACKED: usize = 4096;

type Fingerprint = [u8; 32];

/// What to do with a delivery whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Reject with requeue.
    Requeue,
    /// Reject without requeue; the redelivery budget is spent.
    DeadLetter { redeliveries: u32 },
}

/// Decides between requeue and dead-letter for failed deliveries.
pub struct RedeliveryPolicy {
    max_redeliveries: Option<u32>,
    failures: Mutex<HashMap<Fingerprint, u32>>,
}

impl RedeliveryPolicy {
    /// Unbounded requeue.
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Cap redeliveries at `max_redeliveries` when set.
    pub fn new(max_redeliveries: Option<u32>) -> Self {
        Self {
            max_redeliveries,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_redeliveries(&self) -> Option<u32> {
        self.max_redeliveries
    }

    /// Record a failed delivery and decide what to do with it.
    pub fn on_failure(&self, delivery: &Delivery) -> FailureAction {
        let Some(max) = self.max_redeliveries else {
            return FailureAction::Requeue;
        };

        let redeliveries = match delivery.delivery_count {
            Some(count) => count,
            None => self.count_local_failure(delivery),
        };

        if redeliveries >= max {
            self.forget(delivery);
            FailureAction::DeadLetter { redeliveries }
        } else {
            FailureAction::Requeue
        }
    }

    /// Drop local tracking for a delivery that was settled for good.
    pub fn on_success(&self, delivery: &Delivery) {
        if self.max_redeliveries.is_some() && delivery.redelivered {
            self.forget(delivery);
        }
    }

    /// Returns how many times this payload was redelivered before now.
    fn count_local_failure(&self, delivery: &Delivery) -> u32 {
        let key = fingerprint(&delivery.payload);
        let mut failures = self.lock();

        let previous = if delivery.redelivered {
            failures.get(&key).copied().unwrap_or(0)
        } else {
            0
        };

        if failures.len() >= MAX_TRACKED && !failures.contains_key(&key) {
            if let Some(evicted) = failures.keys().next().copied() {
                failures.remove(&evicted);
            }
        }
        failures.insert(key, previous + 1);

        previous
    }

    fn forget(&self, delivery: &Delivery) {
        self.lock().remove(&fingerprint(&delivery.payload));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, u32>> {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn fingerprint(payload: &[u8]) -> Fingerprint {
    Sha256::digest(payload).into()
}
