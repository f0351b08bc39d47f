//! Fingerprint-keyed pub/sub used to fan a single terminal `Intervention`
//! out to every caller that coalesced onto the same in-flight job (spec
//! §4.1). Delivery is at-least-once: a subscriber that is briefly slow to
//! drain still gets the result because channels here are unbounded, and a
//! publish to a fingerprint with zero current subscribers is simply
//! dropped (the late joiner falls back to the [`result_store`](crate::result_store)
//! instead).
//!
//! Multiple fingerprints may legitimately collide if two distinct
//! inputs hash the same — subscribers are scoped per fingerprint string,
//! not deduplicated further, so a duplicate fingerprint simply gets more
//! subscribers than usual and all of them are notified identically.

use std::sync::Arc;

use aura_core::types::Intervention;
use dashmap::DashMap;

#[derive(Clone)]
pub struct SubscriptionBus {
    inner: Arc<DashMap<String, Vec<flume::Sender<Intervention>>>>,
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Registers interest in `fingerprint`'s terminal result.
    pub fn subscribe(&self, fingerprint: &str) -> flume::Receiver<Intervention> {
        let (tx, rx) = flume::unbounded();
        self.inner
            .entry(fingerprint.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Publishes `intervention` to every subscriber currently waiting on
    /// its fingerprint, then drops the subscriber list (the job is
    /// terminal; there is nothing more to publish for this fingerprint).
    pub fn publish(&self, fingerprint: &str, intervention: Intervention) {
        if let Some((_, senders)) = self.inner.remove(fingerprint) {
            for tx in senders {
                let _ = tx.send(intervention.clone());
            }
        }
    }

    pub fn subscriber_count(&self, fingerprint: &str) -> usize {
        self.inner
            .get(fingerprint)
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }
}

impl Default for SubscriptionBus {
    fn default() -> Self {
        Self::new()
    }
}
