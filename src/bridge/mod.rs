//! Session bridge: one engine, many consumers.
//!
//! The bridge owns the registry of attached consumer channels. Every state
//! change, backend event and diagnostic of the engine is broadcast to all of
//! them, while each call's outcome goes back only to the channel that issued
//! it.
//!
//! A consumer talks to the bridge through a [`ChannelEndpoint`]: it sends
//! [`ProxyEnvelope`]s and receives [`BridgeEnvelope`]s. A router task per
//! channel turns envelopes into engine calls. [`ConsumerProxy`] wraps an
//! endpoint in a call/await API.
//!
//! [`ConsumerProxy`]: crate::ConsumerProxy

mod envelope;
mod registry;

pub use envelope::{BridgeEnvelope, CallId, ChannelId, ProxyEnvelope};

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::engine::{CallResult, ConnectionState, PendingReply, ProtocolEngine};
use crate::error::CallError;
use crate::listeners::Subscription;
use crate::protocol::Event;

use registry::ChannelRegistry;

/// The consumer's side of an attached channel.
#[derive(Debug)]
pub struct ChannelEndpoint {
    pub id: ChannelId,
    pub to_bridge: mpsc::UnboundedSender<ProxyEnvelope>,
    pub from_bridge: mpsc::UnboundedReceiver<BridgeEnvelope>,
}

/// Shares one [`ProtocolEngine`] between any number of consumers.
///
/// Cheap to clone. Construct once at startup and hand clones to whatever
/// creates consumer surfaces.
#[derive(Clone)]
pub struct SessionBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    engine: ProtocolEngine,
    registry: Arc<ChannelRegistry>,
    subscriptions: Vec<Subscription>,
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
    }
}

impl SessionBridge {
    /// Start broadcasting `engine`'s state, events and diagnostics.
    pub fn new(engine: ProtocolEngine) -> Self {
        let registry = Arc::new(ChannelRegistry::new());

        let states = registry.clone();
        let events = registry.clone();
        let errors = registry.clone();
        let subscriptions = vec![
            engine.on_state(move |state| {
                states.broadcast(&BridgeEnvelope::State { state: *state });
            }),
            engine.on_event(move |event| {
                events.broadcast(&BridgeEnvelope::Notification {
                    event: event.clone(),
                });
            }),
            engine.on_error(move |diagnostic| {
                errors.broadcast(&BridgeEnvelope::Error {
                    diagnostic: diagnostic.clone(),
                });
            }),
        ];

        Self {
            inner: Arc::new(BridgeInner {
                engine,
                registry,
                subscriptions,
            }),
        }
    }

    pub fn engine(&self) -> &ProtocolEngine {
        &self.inner.engine
    }

    /// Register a consumer. Its first envelope is the current state.
    ///
    /// Must be called inside a Tokio runtime; the channel's router task is
    /// spawned here.
    pub fn attach(&self) -> ChannelEndpoint {
        let engine = &self.inner.engine;
        let (id, from_bridge) = self.inner.registry.register(|| BridgeEnvelope::State {
            state: engine.state(),
        });
        let (to_bridge, requests) = mpsc::unbounded_channel();

        tokio::spawn(route_channel(self.inner.clone(), id, requests));
        tracing::debug!(channel_id = id, "Consumer attached");

        ChannelEndpoint {
            id,
            to_bridge,
            from_bridge,
        }
    }

    /// Unregister a consumer. Idempotent; calls already in flight still reach
    /// the engine but their outcomes are dropped.
    pub fn detach(&self, channel: ChannelId) {
        self.inner.detach(channel);
    }

    /// Forward a request on behalf of `channel` and return its outcome.
    pub async fn route_request(&self, channel: ChannelId, method: &str, params: Value) -> CallResult {
        self.inner.ensure_attached(channel)?;
        self.inner.engine.send_request(method, params).await
    }

    /// Forward a stream request on behalf of `channel`.
    ///
    /// `on_event` sees this call's partial events until the reply settles,
    /// then is dropped.
    pub async fn route_stream_request<F>(
        &self,
        channel: ChannelId,
        method: &str,
        params: Value,
        on_event: F,
    ) -> CallResult
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.ensure_attached(channel)?;
        self.inner
            .engine
            .send_stream_request(method, params, on_event)
            .await
    }

    /// Forward a notification on behalf of `channel`.
    pub fn route_notification(&self, channel: ChannelId, method: &str, params: Value) {
        if self.inner.registry.contains(channel) {
            self.inner.engine.send_notification(method, params);
        }
    }

    /// Number of attached consumers.
    pub fn channel_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// State as the engine currently reports it.
    pub fn state(&self) -> ConnectionState {
        self.inner.engine.state()
    }
}

impl BridgeInner {
    fn ensure_attached(&self, channel: ChannelId) -> Result<(), CallError> {
        if self.registry.contains(channel) {
            Ok(())
        } else {
            Err(CallError::Detached)
        }
    }

    fn detach(&self, channel: ChannelId) {
        if self.registry.remove(channel) {
            tracing::debug!(channel_id = channel, "Consumer detached");
        }
    }

    /// Queue one call for `channel` and deliver its outcome when it settles.
    fn route_call(&self, channel: ChannelId, call_id: CallId, started: Result<PendingReply, CallError>) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let outcome = match started {
                Ok(reply) => reply.await,
                Err(e) => Err(e),
            };
            if !registry.deliver(channel, BridgeEnvelope::Reply { call_id, outcome }) {
                tracing::debug!(channel_id = channel, call_id, "Dropping reply for detached consumer");
            }
        });
    }
}

/// Serve one channel's envelopes in arrival order until it detaches.
async fn route_channel(
    inner: Arc<BridgeInner>,
    channel: ChannelId,
    mut requests: mpsc::UnboundedReceiver<ProxyEnvelope>,
) {
    while let Some(envelope) = requests.recv().await {
        if !inner.registry.contains(channel) {
            break;
        }
        match envelope {
            ProxyEnvelope::Request {
                call_id,
                method,
                params,
            } => {
                let started = inner.engine.start_request(&method, params);
                inner.route_call(channel, call_id, started);
            }
            ProxyEnvelope::StreamRequest {
                call_id,
                method,
                params,
            } => {
                let registry = inner.registry.clone();
                let sink = Arc::new(move |event: &Event| {
                    registry.deliver(
                        channel,
                        BridgeEnvelope::StreamEvent {
                            call_id,
                            event: event.clone(),
                        },
                    );
                });
                let started = inner.engine.start_stream_request(&method, params, sink);
                inner.route_call(channel, call_id, started);
            }
            ProxyEnvelope::Notify { method, params } => {
                inner.engine.send_notification(&method, params);
            }
            ProxyEnvelope::Detach => break,
        }
    }

    inner.detach(channel);
}
