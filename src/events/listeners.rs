//! Lifecycle listener registry.
//!
//! Listeners are invoked synchronously after a successful mutation. A
//! failing or panicking listener is logged and never affects the mutation
//! or the remaining listeners.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::types::Event;

/// Mutation kinds a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    EventCreated,
    EventUpdated,
    EventDeleted,
}

/// Payload delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    EventCreated { event: Event },
    EventUpdated { event: Event },
    EventDeleted { id: String },
}

impl LifecycleEvent {
    #[must_use]
    pub fn kind(&self) -> LifecycleKind {
        match self {
            Self::EventCreated { .. } => LifecycleKind::EventCreated,
            Self::EventUpdated { .. } => LifecycleKind::EventUpdated,
            Self::EventDeleted { .. } => LifecycleKind::EventDeleted,
        }
    }
}

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync>;

struct Registration {
    id: ListenerId,
    kind: LifecycleKind,
    callback: Callback,
}

/// Registered lifecycle callbacks.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Registration>>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `kind`.
    pub fn add<F>(&self, kind: LifecycleKind, callback: F) -> ListenerId
    where
        F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.push(Registration {
                id,
                kind,
                callback: Arc::new(callback),
            }),
            Err(_) => tracing::error!("listener registry lock poisoned; listener dropped"),
        }
        id
    }

    /// Unregister. Returns `false` if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let Ok(mut listeners) = self.listeners.lock() else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener registered for `event`'s kind.
    pub fn notify(&self, event: &LifecycleEvent) {
        let kind = event.kind();
        // Snapshot so listeners can (un)register without deadlocking.
        let callbacks: Vec<(ListenerId, Callback)> = match self.listeners.lock() {
            Ok(listeners) => listeners
                .iter()
                .filter(|r| r.kind == kind)
                .map(|r| (r.id, Arc::clone(&r.callback)))
                .collect(),
            Err(_) => return,
        };

        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(listener = id.0, ?kind, "lifecycle listener failed: {e:#}");
                }
                Err(_) => {
                    tracing::error!(listener = id.0, ?kind, "lifecycle listener panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn deleted(id: &str) -> LifecycleEvent {
        LifecycleEvent::EventDeleted { id: id.to_owned() }
    }

    #[test]
    fn only_matching_kind_is_invoked() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        registry.add(LifecycleKind::EventCreated, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        registry.notify(&deleted("event_a"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_and_panicking_listeners_do_not_stop_others() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        registry.add(LifecycleKind::EventDeleted, |_| anyhow::bail!("widget offline"));
        registry.add(LifecycleKind::EventDeleted, |_| panic!("listener bug"));
        let counter = Arc::clone(&hits);
        registry.add(LifecycleKind::EventDeleted, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        registry.notify(&deleted("event_a"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_listener_is_not_invoked() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = registry.add(LifecycleKind::EventDeleted, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        registry.notify(&deleted("event_a"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }
}
