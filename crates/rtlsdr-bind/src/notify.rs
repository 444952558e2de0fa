//! "Samples available" notifications.
//!
//! Subscribers run synchronously on the driver's callback thread, after the
//! batch they are told about has been queued. The notification is advisory:
//! another consumer may already have drained those samples by the time a
//! subscriber looks. Subscribers should return quickly and must not panic;
//! a panic is caught and logged by the callback guard, but it also cuts short
//! delivery to the remaining subscribers for that batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Handle returned by [`SampleNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(usize) + Send + Sync>;

/// Fan-out of sample counts to any number of subscribers.
#[derive(Default)]
pub struct SampleNotifier {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
}

impl SampleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback receiving the number of samples just queued.
    pub fn subscribe<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(f)));
        id
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Deliver `count` to every subscriber.
    ///
    /// The subscriber list is snapshotted first so callbacks may subscribe or
    /// unsubscribe without deadlocking.
    pub fn publish(&self, count: usize) {
        let snapshot: Vec<Subscriber> = {
            let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            if subscribers.is_empty() {
                return;
            }
            subscribers.iter().map(|(_, f)| f.clone()).collect()
        };

        for f in snapshot {
            f(count);
        }
    }
}

impl std::fmt::Debug for SampleNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
