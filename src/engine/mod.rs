//! Protocol engine and its builder.
//!
//! The [`EngineBuilder`] provides a fluent API for configuring the engine.
//! The [`ProtocolEngine`] owns the one socket to the backend:
//! 1. Connect (on request) and keep reconnecting with backoff
//! 2. Frame and queue outbound requests and notifications
//! 3. Match replies to pending calls by id
//! 4. Broadcast events, state changes and diagnostics
//!
//! # Example
//!
//! ```ignore
//! use rpc_session::ProtocolEngine;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ProtocolEngine::builder().port(8765).build()?;
//!     engine.on_state(|state| println!("backend is {state}"));
//!     engine.connect();
//!
//!     // ... once the state is `open`:
//!     let status = engine.send_request("task.status", json!({})).await?;
//!     println!("{status}");
//!     Ok(())
//! }
//! ```

mod connection;
mod state;

pub use state::{ConnectionState, Diagnostic, DiagnosticKind};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::backoff::{Backoff, BackoffPolicy};
use crate::codec::JsonCodec;
use crate::config::EngineConfig;
use crate::error::{CallError, Result};
use crate::listeners::{Listeners, Subscription};
use crate::protocol::{Event, Frame, Notification, Request};
use crate::transport::Endpoint;
use crate::writer::WriterHandle;

use connection::{Command, Supervisor};

/// Outcome of one call.
pub type CallResult = std::result::Result<Value, CallError>;

/// Callback receiving the partial events of one stream request.
pub type StreamSink = Arc<dyn Fn(&Event) + Send + Sync>;

/// Builder for configuring and creating a protocol engine.
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    endpoint: Option<String>,
    port: Option<u16>,
}

impl EngineBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend WebSocket URL (`ws://` or `wss://`). Validated by `build()`.
    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    /// Override the port of the endpoint (loopback by default).
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Bound on one connection attempt.
    ///
    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Replace the whole reconnection policy.
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.config.backoff = policy;
        self
    }

    /// Delay before the first reconnection attempt.
    ///
    /// Default: 500ms
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.backoff.base_delay = delay;
        self
    }

    /// Upper bound for reconnection delays.
    ///
    /// Default: 30 seconds
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.backoff.max_delay = delay;
        self
    }

    /// Random jitter as a fraction of each delay step, clamped to 0..=1.
    ///
    /// Default: 0.25
    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.config.backoff.jitter_ratio = ratio;
        self
    }

    /// Outbound queue capacity.
    ///
    /// Default: 1024
    pub fn write_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.write_queue_capacity = capacity;
        self
    }

    /// Params key for stream tokens.
    ///
    /// Default: `streamToken`
    pub fn stream_token_key(mut self, key: &str) -> Self {
        self.config.stream_token_key = key.to_string();
        self
    }

    /// Validate the configuration and start the engine in `idle` state.
    ///
    /// Must be called inside a Tokio runtime; the connection supervisor is
    /// spawned here.
    pub fn build(mut self) -> Result<ProtocolEngine> {
        if let Some(endpoint) = &self.endpoint {
            self.config.endpoint = Endpoint::parse(endpoint)?;
        }
        if let Some(port) = self.port {
            self.config.endpoint = self.config.endpoint.with_port(port);
        }
        Ok(ProtocolEngine::new(self.config))
    }
}

/// Future of a call that has been written to the queue.
///
/// Settles with the matching reply, or with `ConnectionClosed` if the
/// connection leaves `open` first.
#[derive(Debug)]
pub struct PendingReply {
    id: u64,
    rx: oneshot::Receiver<CallResult>,
}

impl PendingReply {
    /// Wire id of the request.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingReply {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(CallError::ConnectionClosed)))
    }
}

/// Handle to the process-wide connection.
///
/// Cheap to clone; every clone drives the same socket.
#[derive(Clone)]
pub struct ProtocolEngine {
    inner: Arc<EngineInner>,
    /// The supervisor stops once every engine handle is dropped.
    commands: mpsc::UnboundedSender<Command>,
}

impl ProtocolEngine {
    /// Create a new engine builder.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Start an engine with the given configuration, in `idle` state.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: EngineConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let backoff = Backoff::new(config.backoff.clone());

        let inner = Arc::new(EngineInner {
            config,
            core: Mutex::new(Core {
                state: ConnectionState::Idle,
                writer: None,
                pending: HashMap::new(),
                streams: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            attempts: AtomicU32::new(0),
            state_listeners: Listeners::new(),
            event_listeners: Listeners::new(),
            error_listeners: Listeners::new(),
        });

        tokio::spawn(Supervisor::new(inner.clone(), commands_rx, backoff).run());

        Self {
            inner,
            commands: commands_tx,
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!(?command, "Engine supervisor has stopped, command ignored");
        }
    }

    /// Begin connecting. No-op while `connecting` or `open`; skips the wait
    /// when a reconnection is already scheduled.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the socket and stop reconnecting until `connect()` is called
    /// again. Pending calls are rejected.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Skip the current backoff wait and try immediately.
    ///
    /// Meant for an external "backend is reachable" signal. Ignored unless a
    /// reconnection is scheduled.
    pub fn reconnect_now(&self) {
        self.command(Command::ReconnectNow);
    }

    /// Stop the connection supervisor for good (process teardown).
    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.core.lock().state
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// Calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.core.lock().pending.len()
    }

    /// Frames queued for the socket but not yet written.
    pub fn queued_frames(&self) -> usize {
        self.inner
            .core
            .lock()
            .writer
            .as_ref()
            .map_or(0, WriterHandle::pending_count)
    }

    /// Stream sessions currently registered.
    pub fn active_streams(&self) -> usize {
        self.inner.core.lock().streams.len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Send a request and wait for its reply.
    ///
    /// Fails immediately with `NotConnected` unless the state is `open`.
    pub async fn send_request(&self, method: &str, params: Value) -> CallResult {
        self.start_request(method, params)?.await
    }

    /// Queue a request and return the future of its reply.
    ///
    /// The frame is queued before this returns, so frames go out in the
    /// order `start_request` calls are made.
    pub fn start_request(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<PendingReply, CallError> {
        self.inner.start_call(method, &params, None)
    }

    /// Send a request whose partial results arrive as events.
    ///
    /// A fresh stream token is written into `params` under the configured
    /// key; events echoing that token go to `on_event` until the reply
    /// arrives. `params` must be an object or null.
    pub async fn send_stream_request<F>(&self, method: &str, params: Value, on_event: F) -> CallResult
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.start_stream_request(method, params, Arc::new(on_event))?
            .await
    }

    /// Queue a stream request and return the future of its reply.
    pub fn start_stream_request(
        &self,
        method: &str,
        params: Value,
        on_event: StreamSink,
    ) -> std::result::Result<PendingReply, CallError> {
        let token = Uuid::new_v4().to_string();
        let params = with_stream_token(params, &self.inner.config.stream_token_key, &token)?;
        self.inner.start_call(method, &params, Some((token, on_event)))
    }

    /// Fire-and-forget. Silently dropped unless the state is `open`.
    pub fn send_notification(&self, method: &str, params: Value) {
        self.inner.notify(method, &params);
    }

    /// Subscribe to state transitions.
    pub fn on_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.inner.state_listeners.subscribe(callback)
    }

    /// Subscribe to backend events, in arrival order.
    pub fn on_event<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.event_listeners.subscribe(callback)
    }

    /// Subscribe to diagnostics.
    pub fn on_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Diagnostic) + Send + Sync + 'static,
    {
        self.inner.error_listeners.subscribe(callback)
    }
}

/// Insert `token` under `key` into object (or null) params.
fn with_stream_token(params: Value, key: &str, token: &str) -> std::result::Result<Value, CallError> {
    match params {
        Value::Null => {
            let mut map = serde_json::Map::new();
            map.insert(key.to_string(), Value::String(token.to_string()));
            Ok(Value::Object(map))
        }
        Value::Object(mut map) => {
            map.insert(key.to_string(), Value::String(token.to_string()));
            Ok(Value::Object(map))
        }
        other => Err(CallError::InvalidParams(format!(
            "stream requests need object params, got {other}"
        ))),
    }
}

struct PendingCall {
    method: String,
    completion: oneshot::Sender<CallResult>,
    stream_token: Option<String>,
}

/// Everything that must change together when the connection opens or drops.
struct Core {
    state: ConnectionState,
    writer: Option<WriterHandle>,
    pending: HashMap<u64, PendingCall>,
    streams: HashMap<String, StreamSink>,
}

pub(crate) struct EngineInner {
    config: EngineConfig,
    core: Mutex<Core>,
    /// Never reset; ids are unique for the engine's lifetime.
    next_id: AtomicU64,
    attempts: AtomicU32,
    state_listeners: Listeners<ConnectionState>,
    event_listeners: Listeners<Event>,
    error_listeners: Listeners<Diagnostic>,
}

impl EngineInner {
    fn start_call(
        &self,
        method: &str,
        params: &Value,
        stream: Option<(String, StreamSink)>,
    ) -> std::result::Result<PendingReply, CallError> {
        let mut core = self.core.lock();
        if !core.state.is_open() {
            return Err(CallError::NotConnected);
        }
        let writer = core.writer.as_ref().ok_or(CallError::NotConnected)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = JsonCodec::encode(&Request { id, method, params })?;
        writer.try_send(text)?;

        let (tx, rx) = oneshot::channel();
        let stream_token = stream.map(|(token, sink)| {
            core.streams.insert(token.clone(), sink);
            token
        });
        core.pending.insert(
            id,
            PendingCall {
                method: method.to_string(),
                completion: tx,
                stream_token,
            },
        );
        tracing::trace!(id, method, "Request queued");

        Ok(PendingReply { id, rx })
    }

    fn notify(&self, method: &str, params: &Value) {
        let core = self.core.lock();
        let Some(writer) = core.writer.as_ref().filter(|_| core.state.is_open()) else {
            tracing::trace!(method, state = %core.state, "Dropping notification while not open");
            return;
        };
        let sent = JsonCodec::encode(&Notification { method, params })
            .and_then(|text| writer.try_send(text));
        if let Err(e) = sent {
            tracing::debug!(method, "Notification dropped: {}", e);
        }
    }

    /// Move to `state` without touching pending work.
    fn transition(&self, state: ConnectionState) {
        {
            let mut core = self.core.lock();
            if core.state == state {
                return;
            }
            core.state = state;
        }
        tracing::debug!(state = %state, "Connection state changed");
        self.state_listeners.emit(&state);
    }

    fn opened(&self, writer: WriterHandle) {
        {
            let mut core = self.core.lock();
            core.state = ConnectionState::Open;
            core.writer = Some(writer);
        }
        self.attempts.store(0, Ordering::Release);
        self.state_listeners.emit(&ConnectionState::Open);
    }

    /// Leave `open` (or `connecting`): drop the writer, tear down stream
    /// sessions and reject every pending call. Returns how many were rejected.
    fn connection_lost(&self, state: ConnectionState) -> usize {
        let (writer, pending, changed) = {
            let mut core = self.core.lock();
            let changed = core.state != state;
            core.state = state;
            core.streams.clear();
            (
                core.writer.take(),
                std::mem::take(&mut core.pending),
                changed,
            )
        };
        // Closing the queue lets the writer task send a close frame and exit.
        drop(writer);

        let rejected = pending.len();
        for (id, call) in pending {
            tracing::debug!(id, method = %call.method, "Rejecting pending call");
            let _ = call.completion.send(Err(CallError::ConnectionClosed));
        }
        if changed {
            self.state_listeners.emit(&state);
        }
        rejected
    }

    fn set_attempts(&self, attempts: u32) {
        self.attempts.store(attempts, Ordering::Release);
    }

    fn diagnose(&self, diagnostic: Diagnostic) {
        self.error_listeners.emit(&diagnostic);
    }

    /// Complete the call waiting on `id` and drop its stream session.
    fn settle(&self, id: u64, outcome: CallResult) {
        let call = {
            let mut core = self.core.lock();
            let call = core.pending.remove(&id);
            if let Some(token) = call.as_ref().and_then(|c| c.stream_token.as_ref()) {
                core.streams.remove(token);
            }
            call
        };
        match call {
            Some(call) => {
                tracing::trace!(id, method = %call.method, ok = outcome.is_ok(), "Reply received");
                let _ = call.completion.send(outcome);
            }
            None => {
                tracing::warn!(id, "Reply for unknown or already settled id");
                self.diagnose(Diagnostic::protocol(format!(
                    "reply for unknown or already settled id {id}"
                )));
            }
        }
    }

    /// Route one inbound text frame.
    fn dispatch(&self, text: &str) {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Discarding malformed frame: {}", e);
                self.diagnose(Diagnostic::protocol(e.to_string()));
                return;
            }
        };

        match frame {
            Frame::Reply { id, outcome } => self.settle(id, outcome.map_err(CallError::Remote)),
            Frame::MalformedReply { id, reason } => {
                tracing::warn!(id, "Unreadable reply: {}", reason);
                self.diagnose(Diagnostic::protocol(reason.clone()));
                self.settle(id, Err(CallError::Protocol(reason)));
            }
            Frame::Event(event) => {
                let sink = event
                    .param_str(&self.config.stream_token_key)
                    .and_then(|token| self.core.lock().streams.get(token).cloned());
                if let Some(sink) = sink {
                    sink(&event);
                }
                self.event_listeners.emit(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_configuration() {
        let builder = ProtocolEngine::builder()
            .endpoint("ws://localhost:9000/rpc")
            .port(9100)
            .connect_timeout(Duration::from_secs(2))
            .base_delay(Duration::from_millis(50))
            .max_delay(Duration::from_secs(4))
            .jitter_ratio(0.5)
            .write_queue_capacity(16)
            .stream_token_key("sessionToken");

        assert_eq!(builder.config.connect_timeout, Duration::from_secs(2));
        assert_eq!(builder.config.backoff.base_delay, Duration::from_millis(50));
        assert_eq!(builder.config.backoff.max_delay, Duration::from_secs(4));
        assert_eq!(builder.config.backoff.jitter_ratio, 0.5);
        assert_eq!(builder.config.write_queue_capacity, 16);
        assert_eq!(builder.config.stream_token_key, "sessionToken");
        assert_eq!(builder.endpoint.as_deref(), Some("ws://localhost:9000/rpc"));
        assert_eq!(builder.port, Some(9100));
    }

    #[tokio::test]
    async fn test_build_applies_endpoint_and_port() {
        let engine = ProtocolEngine::builder()
            .endpoint("ws://localhost:9000/rpc")
            .port(9100)
            .build()
            .unwrap();
        assert_eq!(engine.config().endpoint.as_str(), "ws://localhost:9100/rpc");
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_build_rejects_bad_endpoint() {
        let result = ProtocolEngine::builder().endpoint("http://x").build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_new_engine_is_idle() {
        let engine = ProtocolEngine::builder().build().unwrap();
        assert_eq!(engine.state(), ConnectionState::Idle);
        assert_eq!(engine.pending_calls(), 0);
        assert_eq!(engine.reconnect_attempts(), 0);
        assert_eq!(engine.queued_frames(), 0);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_request_while_not_open_fails_immediately() {
        let engine = ProtocolEngine::builder().build().unwrap();
        let result = engine.send_request("task.status", json!({})).await;
        assert_eq!(result, Err(CallError::NotConnected));
        assert!(matches!(
            engine.start_stream_request("task.run", json!({}), Arc::new(|_: &Event| {})),
            Err(CallError::NotConnected)
        ));
        assert_eq!(engine.pending_calls(), 0);
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_notification_while_not_open_is_dropped() {
        let engine = ProtocolEngine::builder().build().unwrap();
        engine.send_notification("ui.focus", json!({"window": 1}));
        assert_eq!(engine.state(), ConnectionState::Idle);
        engine.shutdown();
    }

    #[test]
    fn test_with_stream_token() {
        let params = with_stream_token(json!({"task": "arena"}), "streamToken", "t-1").unwrap();
        assert_eq!(params, json!({"task": "arena", "streamToken": "t-1"}));

        let params = with_stream_token(Value::Null, "k", "t-2").unwrap();
        assert_eq!(params, json!({"k": "t-2"}));

        let err = with_stream_token(json!([1, 2]), "k", "t-3").unwrap_err();
        assert!(matches!(err, CallError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_pending_reply_settles_closed_when_dropped() {
        let (tx, rx) = oneshot::channel::<CallResult>();
        drop(tx);
        let reply = PendingReply { id: 3, rx };
        assert_eq!(reply.id(), 3);
        assert_eq!(reply.await, Err(CallError::ConnectionClosed));
    }
}
