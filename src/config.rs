//! Engine configuration.
//!
//! [`EngineConfig`] holds every tunable of the protocol engine. Build it with
//! [`EngineBuilder`](crate::EngineBuilder) or start from `Default` and
//! override fields.

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::transport::Endpoint;
use crate::writer::DEFAULT_QUEUE_CAPACITY;

/// Default bound on a single connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default params key carrying the per-call stream token.
pub const DEFAULT_STREAM_TOKEN_KEY: &str = "streamToken";

/// Configuration for the protocol engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backend WebSocket address.
    pub endpoint: Endpoint,
    /// Bound on one connection attempt (TCP connect + handshake).
    pub connect_timeout: Duration,
    /// Reconnection delays.
    pub backoff: BackoffPolicy,
    /// Frames that may wait for the writer task before sends fail.
    pub write_queue_capacity: usize,
    /// Params key under which stream requests carry their token, and under
    /// which stream events must echo it.
    pub stream_token_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            backoff: BackoffPolicy::default(),
            write_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stream_token_key: DEFAULT_STREAM_TOKEN_KEY.to_string(),
        }
    }
}
