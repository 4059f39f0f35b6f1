use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock, Weak,
    },
};

use super::run_state::RunState;

/// Observer of run state changes. Closures taking a `RunState` implement it.
///
/// Called while the coordinator holds its run state lock, so an
/// implementation must return quickly and must not call back into the
/// coordinator.
pub trait Subscriber: Send + Sync {
    fn on_state_changed(&self, snapshot: RunState);
}

impl<F> Subscriber for F
where
    F: Fn(RunState) + Send + Sync,
{
    fn on_state_changed(&self, snapshot: RunState) {
        self(snapshot)
    }
}

type SubscriberMap = RwLock<BTreeMap<u64, Arc<dyn Subscriber>>>;

#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Arc<SubscriberMap>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, subscriber: Arc<dyn Subscriber>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, subscriber);

        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Delivers `snapshot` to every registered subscriber. The list is copied
    /// first so a subscriber may unregister itself from inside its callback.
    pub fn notify(&self, snapshot: &RunState) {
        let subscribers: Vec<_> = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        for subscriber in subscribers {
            subscriber.on_state_changed(snapshot.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Unregister handle. Dropping it unregisters too.
#[must_use = "dropping a Subscription unregisters the subscriber"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<SubscriberMap>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::run_state::Phase;
    use std::sync::Mutex;

    #[test]
    fn test_every_subscriber_gets_every_snapshot() {
        let registry = SubscriberRegistry::new();
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));

        let a = seen_a.clone();
        let _sub_a = registry.register(Arc::new(move |s: RunState| a.lock().unwrap().push(s.phase)));
        let b = seen_b.clone();
        let _sub_b = registry.register(Arc::new(move |s: RunState| b.lock().unwrap().push(s.phase)));

        let mut state = RunState::default();
        registry.notify(&state);
        state.phase = Phase::Initial;
        registry.notify(&state);

        assert_eq!(*seen_a.lock().unwrap(), vec![Phase::Idle, Phase::Initial]);
        assert_eq!(*seen_b.lock().unwrap(), vec![Phase::Idle, Phase::Initial]);
    }

    #[test]
    fn test_unsubscribe_and_drop() {
        let registry = SubscriberRegistry::new();
        let count = Arc::new(AtomicU64::new(0));

        let c = count.clone();
        let sub = registry.register(Arc::new(move |_: RunState| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let c = count.clone();
        let other = registry.register(Arc::new(move |_: RunState| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(registry.len(), 2);

        sub.unsubscribe();
        registry.notify(&RunState::default());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        drop(other);
        registry.notify(&RunState::default());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let registry = SubscriberRegistry::new();
        let sub = registry.register(Arc::new(|_: RunState| {}));
        drop(registry);
        drop(sub);
    }
}
