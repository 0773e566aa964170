//! Typed observer lists.
//!
//! Components expose `ObserverSet` fields for their lifecycle events
//! (block processed, cemented, connection accepted, ...). Subscribers
//! register ahead of time; notification snapshots the subscriber list
//! and invokes it after releasing the set's own lock, so observers can
//! re-enter the owning component. Owners must likewise notify outside
//! their component mutexes.

use parking_lot::RwLock;
use std::sync::Arc;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A thread-safe list of observers for events of type `T`.
///
/// Multi-argument events use a tuple for `T`.
pub struct ObserverSet<T> {
    observers: RwLock<Vec<Callback<T>>>,
}

impl<T> ObserverSet<T> {
    /// Creates an empty observer set.
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Registers an observer.
    pub fn add(&self, observer: impl Fn(&T) + Send + Sync + 'static) {
        self.observers.write().push(Arc::new(observer));
    }

    /// Notifies all observers with the event.
    pub fn notify(&self, event: &T) {
        let snapshot: Vec<Callback<T>> = self.observers.read().clone();
        for observer in snapshot {
            observer(event);
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// True when no observers are registered.
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }
}

impl<T> Default for ObserverSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_all() {
        let set: ObserverSet<u32> = ObserverSet::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            set.add(move |value| {
                hits.fetch_add(*value as usize, Ordering::SeqCst);
            });
        }
        set.notify(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_observer_can_reenter() {
        let set: Arc<ObserverSet<u32>> = Arc::new(ObserverSet::new());
        let inner = set.clone();
        set.add(move |_| {
            // Re-entrant registration must not deadlock
            inner.add(|_| {});
        });
        set.notify(&1);
        assert_eq!(set.len(), 2);
    }
}
