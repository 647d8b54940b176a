//! Publish/subscribe fan-out for component events.
//!
//! DESIGN
//! ======
//! Each component owns one `EventBus<E>` for its own event enum. Handlers
//! are kept in a `BTreeMap` keyed by a monotonically increasing
//! subscription id, so delivery order is subscription order. `publish`
//! snapshots the handler list and releases the lock before calling out,
//! which lets a handler unsubscribe itself (or others) while running.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    handlers: BTreeMap<u64, Handler<E>>,
}

/// Ordered handler registry for one event type.
pub struct EventBus<E> {
    inner: Arc<Mutex<Registry<E>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Registry { next_id: 0, handlers: BTreeMap::new() })) }
    }

    /// Register a handler. It stays registered until the returned
    /// [`Subscription`] is unsubscribed; dropping the handle does not
    /// unsubscribe.
    pub fn subscribe(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> Subscription
    where
        E: 'static,
    {
        let mut reg = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = reg.next_id;
        reg.next_id += 1;
        reg.handlers.insert(id, Arc::new(handler));

        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            remove: Box::new(move |id| {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .handlers
                        .remove(&id);
                }
            }),
        }
    }

    /// Deliver an event to every handler registered at call time.
    pub fn publish(&self, event: &E) {
        let handlers: Vec<Handler<E>> = {
            let reg = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            reg.handlers.values().cloned().collect()
        };
        for handler in handlers {
            handler(event);
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }
}

/// Handle returned by [`EventBus::subscribe`].
pub struct Subscription {
    id: u64,
    remove: Box<dyn Fn(u64) + Send + Sync>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the handler. Safe to call any number of times, and after the
    /// bus itself has been dropped.
    pub fn unsubscribe(&self) {
        (self.remove)(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
