//! Listener registry with snapshot-then-iterate broadcast.
//!
//! Used by the engine (state, events, diagnostics) and by every consumer
//! proxy (state, notification, error). A broadcast clones the current set of
//! callbacks and releases the lock before calling any of them, so a callback
//! may subscribe or unsubscribe (itself included) while a broadcast is in
//! progress.
//!
//! # Example
//!
//! ```
//! use rpc_session::Listeners;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let listeners: Listeners<u32> = Listeners::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let seen2 = seen.clone();
//! let sub = listeners.subscribe(move |n| {
//!     seen2.fetch_add(*n as usize, Ordering::SeqCst);
//! });
//!
//! listeners.emit(&2);
//! sub.unsubscribe();
//! listeners.emit(&5);
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback<T>)>>,
}

/// A set of callbacks for one kind of notification.
pub struct Listeners<T> {
    registry: Arc<Registry<T>>,
}

impl<T: 'static> Listeners<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a callback. It stays registered until
    /// [`Subscription::unsubscribe`] or [`Listeners::clear`]; dropping the
    /// returned handle does not remove it.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.entries.lock().push((id, Arc::new(callback)));

        let weak: Weak<Registry<T>> = Arc::downgrade(&self.registry);
        Subscription {
            remove: Mutex::new(Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.entries.lock().retain(|(entry, _)| *entry != id);
                }
            }))),
        }
    }

    /// Call every registered callback, in subscription order.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .registry
            .entries
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in snapshot {
            callback(value);
        }
    }

    /// Remove every callback.
    pub fn clear(&self) {
        self.registry.entries.lock().clear();
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.registry.entries.lock().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`Listeners::subscribe`].
pub struct Subscription {
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Remove the callback. Calling this more than once is harmless.
    pub fn unsubscribe(&self) {
        if let Some(remove) = self.remove.lock().take() {
            remove();
        }
    }

    /// A handle that removes nothing, for operations that became no-ops.
    pub(crate) fn noop() -> Self {
        Self {
            remove: Mutex::new(None),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.lock().is_some())
            .finish()
    }
}
