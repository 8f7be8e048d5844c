//! Repository event registry.
//!
//! Listeners register against the repository and receive change
//! notifications through opaque handles. Dispatch happens outside any
//! storage lock, and a failing listener never breaks the storage
//! operation that fired the event.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Events the core fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryEvent {
    ConfigChanged,
    IndexChanged,
}

/// Opaque handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

type Listener = Arc<dyn Fn(RepositoryEvent) + Send + Sync>;

/// Listener storage owned by the repository.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; the handle removes it again.
    pub fn add(&self, listener: impl Fn(RepositoryEvent) + Send + Sync + 'static) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, Arc::new(listener));
        ListenerHandle(id)
    }

    /// Remove a listener; true if it was still registered.
    pub fn remove(&self, handle: ListenerHandle) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&handle.0)
            .is_some()
    }

    /// Dispatch an event to a snapshot of the current listeners.
    ///
    /// Listener panics are swallowed: a broken observer must not fail the
    /// storage operation that triggered the event.
    pub fn fire(&self, event: RepositoryEvent) {
        let snapshot: Vec<Listener> = {
            let guard = self
                .listeners
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.values().cloned().collect()
        };
        for listener in snapshot {
            let _ = catch_unwind(AssertUnwindSafe(|| listener(event)));
        }
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn listeners_receive_events() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        registry.add(move |event| {
            assert_eq!(event, RepositoryEvent::ConfigChanged);
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.fire(RepositoryEvent::ConfigChanged);
        registry.fire(RepositoryEvent::ConfigChanged);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let handle = registry.add(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.fire(RepositoryEvent::IndexChanged);
        assert!(registry.remove(handle));
        registry.fire(RepositoryEvent::IndexChanged);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!registry.remove(handle));
    }

    #[test]
    fn panicking_listener_does_not_stop_dispatch() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        registry.add(|_| panic!("misbehaving listener"));
        let c = Arc::clone(&count);
        registry.add(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.fire(RepositoryEvent::ConfigChanged);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
