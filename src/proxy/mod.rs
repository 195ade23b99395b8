//! Consumer proxy: a private-looking session for one surface.
//!
//! A proxy owns one bridge channel and its own table of outstanding calls,
//! keyed by locally allocated call ids. A pump task reads envelopes from the
//! bridge and settles calls, forwards stream events and fans out state,
//! notifications and diagnostics to local listeners.
//!
//! # Example
//!
//! ```ignore
//! use rpc_session::{ConsumerProxy, SessionBridge};
//! use serde_json::json;
//!
//! async fn run_task(bridge: &SessionBridge) {
//!     let proxy = ConsumerProxy::attach(bridge);
//!     let _sub = proxy.on_state(|state| println!("session is {state}"));
//!
//!     let outcome = proxy
//!         .request_stream("task.run", json!({"task": "daily"}), |event| {
//!             println!("progress: {}", event.params);
//!         })
//!         .await;
//!     println!("{outcome:?}");
//!
//!     proxy.destroy();
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bridge::{BridgeEnvelope, CallId, ChannelEndpoint, ChannelId, ProxyEnvelope, SessionBridge};
use crate::engine::{CallResult, ConnectionState, Diagnostic, StreamSink};
use crate::error::CallError;
use crate::listeners::{Listeners, Subscription};
use crate::protocol::Event;

struct LocalCall {
    completion: oneshot::Sender<CallResult>,
    on_event: Option<StreamSink>,
}

/// Call/await and subscribe interface for one consumer surface.
///
/// Cheap to clone; all clones share the channel. Call [`destroy`] once when
/// the surface goes away.
///
/// [`destroy`]: ConsumerProxy::destroy
#[derive(Clone)]
pub struct ConsumerProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    channel_id: ChannelId,
    to_bridge: mpsc::UnboundedSender<ProxyEnvelope>,
    next_call_id: AtomicU64,
    calls: Mutex<HashMap<CallId, LocalCall>>,
    destroyed: AtomicBool,
    /// `None` until the attach greeting arrives.
    state: Mutex<Option<ConnectionState>>,
    state_listeners: Listeners<ConnectionState>,
    notification_listeners: Listeners<Event>,
    error_listeners: Listeners<Diagnostic>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerProxy {
    /// Attach a new consumer to `bridge`.
    pub fn attach(bridge: &SessionBridge) -> Self {
        Self::from_endpoint(bridge.attach())
    }

    /// Wrap an already attached channel.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_endpoint(endpoint: ChannelEndpoint) -> Self {
        let ChannelEndpoint {
            id,
            to_bridge,
            from_bridge,
        } = endpoint;

        let inner = Arc::new(ProxyInner {
            channel_id: id,
            to_bridge,
            next_call_id: AtomicU64::new(1),
            calls: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
            state: Mutex::new(None),
            state_listeners: Listeners::new(),
            notification_listeners: Listeners::new(),
            error_listeners: Listeners::new(),
            pump: Mutex::new(None),
        });

        let pump = tokio::spawn(pump_envelopes(Arc::downgrade(&inner), from_bridge));
        *inner.pump.lock() = Some(pump);

        Self { inner }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.inner.channel_id
    }

    /// Last state delivered by the bridge (`Idle` before the first one).
    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().unwrap_or(ConnectionState::Idle)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Calls issued through this proxy that have not settled yet.
    pub fn outstanding_calls(&self) -> usize {
        self.inner.calls.lock().len()
    }

    /// Send a request and wait for its outcome.
    ///
    /// After [`destroy`](Self::destroy) nothing is sent and the call resolves
    /// at once with `Err(CallError::Detached)`.
    pub async fn request(&self, method: &str, params: Value) -> CallResult {
        let rx = self.inner.start(None, |call_id| ProxyEnvelope::Request {
            call_id,
            method: method.to_string(),
            params,
        })?;
        rx.await.unwrap_or(Err(CallError::Detached))
    }

    /// Send a stream request. `on_event` sees zero or more partial events,
    /// never after the returned future resolves.
    ///
    /// After [`destroy`](Self::destroy) nothing is sent, `on_event` is never
    /// called and the call resolves at once with `Err(CallError::Detached)`.
    pub async fn request_stream<F>(&self, method: &str, params: Value, on_event: F) -> CallResult
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let sink: StreamSink = Arc::new(on_event);
        let rx = self.inner.start(Some(sink), |call_id| ProxyEnvelope::StreamRequest {
            call_id,
            method: method.to_string(),
            params,
        })?;
        rx.await.unwrap_or(Err(CallError::Detached))
    }

    /// One-way message. No-op after `destroy()`.
    pub fn notify(&self, method: &str, params: Value) {
        if self.is_destroyed() {
            return;
        }
        let _ = self.inner.to_bridge.send(ProxyEnvelope::Notify {
            method: method.to_string(),
            params,
        });
    }

    /// Listen for connection state changes.
    pub fn on_state<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        if self.is_destroyed() {
            return Subscription::noop();
        }
        self.inner.state_listeners.subscribe(listener)
    }

    /// Listen for backend events.
    pub fn on_notification<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if self.is_destroyed() {
            return Subscription::noop();
        }
        self.inner.notification_listeners.subscribe(listener)
    }

    /// Listen for diagnostics.
    pub fn on_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Diagnostic) + Send + Sync + 'static,
    {
        if self.is_destroyed() {
            return Subscription::noop();
        }
        self.inner.error_listeners.subscribe(listener)
    }

    /// Detach from the bridge, drop every listener and settle outstanding
    /// calls with `CallError::Detached`. Later calls are no-ops.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.inner.to_bridge.send(ProxyEnvelope::Detach);

        self.inner.state_listeners.clear();
        self.inner.notification_listeners.clear();
        self.inner.error_listeners.clear();

        let calls = std::mem::take(&mut *self.inner.calls.lock());
        for (_, call) in calls {
            let _ = call.completion.send(Err(CallError::Detached));
        }

        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        tracing::debug!(channel_id = self.inner.channel_id, "Consumer proxy destroyed");
    }
}

impl ProxyInner {
    /// Register a call and hand its envelope to the bridge.
    fn start<F>(
        &self,
        on_event: Option<StreamSink>,
        envelope: F,
    ) -> Result<oneshot::Receiver<CallResult>, CallError>
    where
        F: FnOnce(CallId) -> ProxyEnvelope,
    {
        let mut calls = self.calls.lock();
        // Checked under the lock so destroy() cannot miss this call.
        if self.destroyed.load(Ordering::Acquire) {
            return Err(CallError::Detached);
        }

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        self.to_bridge
            .send(envelope(call_id))
            .map_err(|_| CallError::Detached)?;

        let (tx, rx) = oneshot::channel();
        calls.insert(
            call_id,
            LocalCall {
                completion: tx,
                on_event,
            },
        );
        Ok(rx)
    }

    fn handle(&self, envelope: BridgeEnvelope) {
        match envelope {
            BridgeEnvelope::Reply { call_id, outcome } => {
                let call = self.calls.lock().remove(&call_id);
                match call {
                    Some(call) => {
                        let _ = call.completion.send(outcome);
                    }
                    None => {
                        tracing::debug!(channel_id = self.channel_id, call_id, "Reply for unknown call");
                    }
                }
            }
            BridgeEnvelope::StreamEvent { call_id, event } => {
                let sink = self
                    .calls
                    .lock()
                    .get(&call_id)
                    .and_then(|call| call.on_event.clone());
                if let Some(sink) = sink {
                    sink(&event);
                }
            }
            BridgeEnvelope::State { state } => {
                {
                    let mut current = self.state.lock();
                    if *current == Some(state) {
                        return;
                    }
                    *current = Some(state);
                }
                self.state_listeners.emit(&state);
            }
            BridgeEnvelope::Notification { event } => self.notification_listeners.emit(&event),
            BridgeEnvelope::Error { diagnostic } => self.error_listeners.emit(&diagnostic),
        }
    }

    /// The bridge side is gone; nothing can settle outstanding calls anymore.
    fn channel_lost(&self) {
        let calls = std::mem::take(&mut *self.calls.lock());
        for (_, call) in calls {
            let _ = call.completion.send(Err(CallError::Detached));
        }
    }
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        if !self.destroyed.load(Ordering::Acquire) {
            let _ = self.to_bridge.send(ProxyEnvelope::Detach);
        }
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

async fn pump_envelopes(inner: Weak<ProxyInner>, mut from_bridge: mpsc::UnboundedReceiver<BridgeEnvelope>) {
    while let Some(envelope) = from_bridge.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.destroyed.load(Ordering::Acquire) {
            return;
        }
        inner.handle(envelope);
    }

    if let Some(inner) = inner.upgrade() {
        inner.channel_lost();
    }
}
