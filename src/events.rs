//! Lifecycle Event Notification
//!
//! The store emits a small, fixed vocabulary of events so observers (UI
//! widgets, metrics, invalidation hooks) can react to mutations without
//! polling. There are no wildcard or namespaced events.
//!
//! ## Semantics
//!
//! - Callbacks for an event kind run **synchronously**, in registration
//!   order, each receiving the same payload.
//! - A panicking callback is caught and logged; it never prevents the
//!   remaining callbacks from running and never propagates to the store
//!   operation that triggered the emission.
//! - Subscriptions are process-local. They are not persisted and do not
//!   survive `close()`.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// The fixed set of event kinds a store can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A single entry was written via `set`.
    Set,
    /// An entry was removed via `delete`.
    Delete,
    /// A stale entry was purged, either lazily on read or by a sweep.
    Expired,
    /// The whole store was wiped.
    Clear,
    /// A sweep finished and removed at least one entry.
    Cleanup,
}

/// Payload delivered to subscribers.
#[derive(Debug, Clone)]
pub enum Event {
    /// Emitted after a successful `set`.
    Set {
        /// The key that was written.
        key: String,
        /// The stored value.
        value: Value,
        /// The TTL that was applied, in milliseconds, if any.
        ttl_ms: Option<u64>,
    },
    /// Emitted after a `delete`.
    Delete {
        /// The key that was removed.
        key: String,
    },
    /// Emitted once per stale entry that was physically purged.
    Expired {
        /// The key that expired.
        key: String,
    },
    /// Emitted after `clear` wiped the store.
    Clear,
    /// Emitted after a sweep that removed at least one entry.
    Cleanup {
        /// How many entries the sweep purged.
        deleted_count: u64,
    },
}

impl Event {
    /// Returns the kind this payload belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Set { .. } => EventKind::Set,
            Event::Delete { .. } => EventKind::Delete,
            Event::Expired { .. } => EventKind::Expired,
            Event::Clear => EventKind::Clear,
            Event::Cleanup { .. } => EventKind::Cleanup,
        }
    }
}

/// Opaque handle identifying one registered callback.
///
/// Returned by `KvStore::on` and consumed by `KvStore::off`. Removing a
/// handle that is no longer registered is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Registry of event subscribers, owned by the store.
///
/// Callbacks are stored per kind as an ordered list. Emission snapshots the
/// list before invoking, so a callback may register or remove subscriptions
/// without deadlocking.
pub(crate) struct Subscribers {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(SubscriptionId, Callback)>>,
}

impl Subscribers {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            handlers: HashMap::new(),
        }
    }

    /// Registers a callback for an event kind, returning its handle.
    pub(crate) fn on<F>(&mut self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Removes a previously registered callback. Unknown handles are ignored.
    pub(crate) fn off(&mut self, kind: EventKind, id: SubscriptionId) {
        if let Some(list) = self.handlers.get_mut(&kind) {
            list.retain(|(existing, _)| *existing != id);
        }
    }

    /// Snapshots the callbacks registered for a kind, in registration order.
    pub(crate) fn snapshot(&self, kind: EventKind) -> Vec<Callback> {
        self.handlers
            .get(&kind)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    /// Discards all subscriptions. Called on `close()`.
    pub(crate) fn clear(&mut self) {
        self.handlers.clear();
    }
}

/// Invokes a snapshot of callbacks with the given payload.
///
/// Each invocation is isolated: a panic is caught, logged, and the next
/// callback still runs. Emission is fire-and-forget from the perspective of
/// the mutating operation.
pub(crate) fn dispatch(callbacks: &[Callback], event: &Event) {
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            warn!(kind = ?event.kind(), "event subscriber panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let mut subs = Subscribers::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            subs.on(EventKind::Set, move |_| {
                order.lock().unwrap().push(tag);
            });
        }

        let snapshot = subs.snapshot(EventKind::Set);
        dispatch(
            &snapshot,
            &Event::Set {
                key: "k".to_string(),
                value: Value::Null,
                ttl_ms: None,
            },
        );

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_off_removes_only_the_named_callback() {
        let mut subs = Subscribers::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_a = Arc::clone(&hits);
        let a = subs.on(EventKind::Delete, move |_| {
            hits_a.fetch_add(1, Ordering::SeqCst);
        });
        let hits_b = Arc::clone(&hits);
        let _b = subs.on(EventKind::Delete, move |_| {
            hits_b.fetch_add(10, Ordering::SeqCst);
        });

        subs.off(EventKind::Delete, a);
        // Removing an already-removed handle is a no-op
        subs.off(EventKind::Delete, a);

        let snapshot = subs.snapshot(EventKind::Delete);
        dispatch(
            &snapshot,
            &Event::Delete {
                key: "k".to_string(),
            },
        );

        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_panicking_callback_does_not_stop_later_callbacks() {
        let mut subs = Subscribers::new();
        let hits = Arc::new(AtomicUsize::new(0));

        subs.on(EventKind::Set, |_| panic!("subscriber bug"));
        let hits_clone = Arc::clone(&hits);
        subs.on(EventKind::Set, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        let snapshot = subs.snapshot(EventKind::Set);
        dispatch(
            &snapshot,
            &Event::Set {
                key: "k".to_string(),
                value: Value::Null,
                ttl_ms: None,
            },
        );

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(Event::Clear.kind(), EventKind::Clear);
        assert_eq!(
            Event::Cleanup { deleted_count: 3 }.kind(),
            EventKind::Cleanup
        );
        assert_eq!(
            Event::Expired {
                key: "k".to_string()
            }
            .kind(),
            EventKind::Expired
        );
    }
}
