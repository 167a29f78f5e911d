//! State observer bus
//!
//! Observers receive every published snapshot, synchronously, in
//! subscription order, on whichever thread publishes. A panicking
//! observer is caught and logged; its subscription stays valid and it
//! keeps receiving snapshots.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::snapshot::EngineState;

type Observer = Arc<dyn Fn(&EngineState) + Send + Sync>;

/// Snapshot delivery registry
#[derive(Default)]
pub struct ObserverBus {
    observers: Vec<(u64, Observer)>,
    next_id: u64,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, observer: F) -> u64
    where
        F: Fn(&EngineState) + Send + Sync + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.observers.push((id, Arc::new(observer)));
        id
    }

    /// Idempotent removal
    pub fn unsubscribe(&mut self, id: u64) {
        self.observers.retain(|(oid, _)| *oid != id);
    }

    /// Deliver one snapshot to every observer, in subscription order
    pub fn notify(&self, state: &EngineState) {
        for (id, observer) in &self.observers {
            let observer = Arc::clone(observer);
            if catch_unwind(AssertUnwindSafe(|| observer(state))).is_err() {
                log::error!("state observer {id} panicked; keeping subscription");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for ObserverBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverBus")
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delivery_in_subscription_order() {
        let mut bus = ObserverBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            bus.subscribe(move |_| order.lock().unwrap().push(tag));
        }
        bus.notify(&EngineState::default());
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unsubscribe_idempotent() {
        let mut bus = ObserverBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        bus.notify(&EngineState::default());
        bus.unsubscribe(id);
        bus.unsubscribe(id);
        bus.notify(&EngineState::default());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_panicking_observer_stays_subscribed() {
        let mut bus = ObserverBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_| panic!("observer bug"));
        let c = Arc::clone(&count);
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        bus.notify(&EngineState::default());
        bus.notify(&EngineState::default());
        // The panicking observer did not unseat the second one, and
        // stayed registered itself
        assert_eq!(bus.len(), 2);
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }
}
