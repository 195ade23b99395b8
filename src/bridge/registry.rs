//! Registry of attached consumer channels.
//!
//! Channels are kept in id order so broadcasts reach consumers in attach
//! order. Every send happens under the registry lock, which keeps the
//! relative order of broadcasts identical on every channel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::envelope::{BridgeEnvelope, ChannelId};

pub(crate) struct ChannelRegistry {
    channels: Mutex<BTreeMap<ChannelId, mpsc::UnboundedSender<BridgeEnvelope>>>,
    /// Next channel id (starts from 1).
    next_id: AtomicU64,
}

impl ChannelRegistry {
    pub(crate) fn new() -> Self {
        Self {
            channels: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a channel whose first envelope is `greeting()`.
    ///
    /// `greeting` runs under the registry lock, so no broadcast can slip in
    /// between it and the registration.
    pub(crate) fn register<F>(
        &self,
        greeting: F,
    ) -> (ChannelId, mpsc::UnboundedReceiver<BridgeEnvelope>)
    where
        F: FnOnce() -> BridgeEnvelope,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut channels = self.channels.lock();
        // Receiver is alive in this scope.
        let _ = tx.send(greeting());
        channels.insert(id, tx);

        (id, rx)
    }

    /// Unregister. Returns false if the channel was not attached.
    pub(crate) fn remove(&self, id: ChannelId) -> bool {
        self.channels.lock().remove(&id).is_some()
    }

    pub(crate) fn contains(&self, id: ChannelId) -> bool {
        self.channels.lock().contains_key(&id)
    }

    /// Send to one channel. Returns false if it is gone.
    pub(crate) fn deliver(&self, id: ChannelId, envelope: BridgeEnvelope) -> bool {
        let channels = self.channels.lock();
        match channels.get(&id) {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }

    /// Send to every attached channel.
    pub(crate) fn broadcast(&self, envelope: &BridgeEnvelope) {
        let mut channels = self.channels.lock();
        channels.retain(|id, tx| {
            let alive = tx.send(envelope.clone()).is_ok();
            if !alive {
                tracing::debug!(channel_id = id, "Pruning channel with dropped receiver");
            }
            alive
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ConnectionState;

    fn state(state: ConnectionState) -> BridgeEnvelope {
        BridgeEnvelope::State { state }
    }

    #[test]
    fn test_register_sends_greeting_first() {
        let registry = ChannelRegistry::new();
        let (id, mut rx) = registry.register(|| state(ConnectionState::Open));

        registry.broadcast(&state(ConnectionState::Closed));

        assert_eq!(id, 1);
        assert_eq!(rx.try_recv().unwrap(), state(ConnectionState::Open));
        assert_eq!(rx.try_recv().unwrap(), state(ConnectionState::Closed));
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = ChannelRegistry::new();
        let (a, _ra) = registry.register(|| state(ConnectionState::Idle));
        let (b, _rb) = registry.register(|| state(ConnectionState::Idle));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ChannelRegistry::new();
        let (id, _rx) = registry.register(|| state(ConnectionState::Idle));

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(!registry.contains(id));
        assert!(!registry.deliver(id, state(ConnectionState::Open)));
    }

    #[test]
    fn test_broadcast_skips_removed_and_prunes_dropped() {
        let registry = ChannelRegistry::new();
        let (a, mut ra) = registry.register(|| state(ConnectionState::Idle));
        let (b, mut rb) = registry.register(|| state(ConnectionState::Idle));
        let (_c, rc) = registry.register(|| state(ConnectionState::Idle));
        drop(rc);
        ra.try_recv().unwrap();
        rb.try_recv().unwrap();

        registry.remove(a);
        registry.broadcast(&state(ConnectionState::Connecting));

        assert!(ra.try_recv().is_err());
        assert_eq!(rb.try_recv().unwrap(), state(ConnectionState::Connecting));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(b));
    }
}
