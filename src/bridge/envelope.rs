//! Messages crossing the proxy/bridge boundary.
//!
//! Both directions are plain serde enums so the boundary can be an in-process
//! channel or a serialized transport between processes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{CallResult, ConnectionState, Diagnostic};
use crate::protocol::Event;

/// Identifies one attached consumer.
pub type ChannelId = u64;

/// Proxy-local call id. Unrelated to the engine's wire ids.
pub type CallId = u64;

/// Proxy → bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxyEnvelope {
    Request {
        call_id: CallId,
        method: String,
        params: Value,
    },
    StreamRequest {
        call_id: CallId,
        method: String,
        params: Value,
    },
    Notify {
        method: String,
        params: Value,
    },
    /// The consumer is going away.
    Detach,
}

/// Bridge → proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEnvelope {
    /// Terminal outcome of one call.
    Reply { call_id: CallId, outcome: CallResult },
    /// Partial result of a stream call, always before its `Reply`.
    StreamEvent { call_id: CallId, event: Event },
    State { state: ConnectionState },
    Notification { event: Event },
    Error { diagnostic: Diagnostic },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use serde_json::json;

    #[test]
    fn test_proxy_envelope_json_shape() {
        let envelope = ProxyEnvelope::Request {
            call_id: 4,
            method: "task.status".into(),
            params: json!({}),
        };
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"type": "request", "call_id": 4, "method": "task.status", "params": {}})
        );
        assert_eq!(
            serde_json::to_value(ProxyEnvelope::Detach).unwrap(),
            json!({"type": "detach"})
        );
    }

    #[test]
    fn test_reply_envelope_carries_call_error() {
        let envelope = BridgeEnvelope::Reply {
            call_id: 9,
            outcome: Err(CallError::ConnectionClosed),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: BridgeEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }
}
