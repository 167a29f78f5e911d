//! Runtime event bus
//!
//! Control-plane notifications published by the pattern runtime after a
//! mutation commits. Listeners run synchronously on the thread that
//! caused the event.

/// Engine-internal pattern runtime events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// A pattern's content or timing changed
    PatternChanged(String),
    /// A pattern was removed from the runtime
    PatternDeleted(String),
    /// A sequencer's pattern or chain binding changed
    SequencerBindingChanged(String),
}

type Listener = Box<dyn Fn(&RuntimeEvent) + Send + Sync>;

/// Listener registry with stable removal handles
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(u64, Listener)>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, listener: F) -> u64
    where
        F: Fn(&RuntimeEvent) + Send + Sync + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Idempotent removal
    pub fn unsubscribe(&mut self, id: u64) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    /// Deliver to every listener in subscription order
    pub fn publish(&self, event: &RuntimeEvent) {
        for (_, listener) in &self.listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_publish_unsubscribe() {
        let mut bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let id = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        bus.publish(&RuntimeEvent::PatternChanged("P0".into()));
        assert_eq!(count.load(Ordering::Relaxed), 1);

        bus.unsubscribe(id);
        bus.unsubscribe(id); // idempotent
        bus.publish(&RuntimeEvent::PatternChanged("P0".into()));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
