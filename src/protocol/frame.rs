//! Inbound frame classification.
//!
//! A text message from the backend is either a reply to one of our requests
//! (it carries an `id`) or an unsolicited event (no `id`, has `method`).
//! Anything else is a protocol error; the caller logs it and keeps the
//! connection.
//!
//! # Example
//!
//! ```
//! use rpc_session::protocol::Frame;
//!
//! let frame = Frame::parse(r#"{"id": 3, "result": "ok"}"#).unwrap();
//! assert_eq!(frame.reply_id(), Some(3));
//!
//! let frame = Frame::parse(r#"{"method": "task.progress", "params": {"pct": 40}}"#).unwrap();
//! assert!(frame.is_event());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::wire_format::RpcErrorObject;
use crate::codec::JsonCodec;
use crate::error::{Result, SessionError};

/// Unsolicited message from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Event {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// String value of `key` inside object params, if present.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Reply to the request with this id.
    Reply {
        id: u64,
        outcome: std::result::Result<Value, RpcErrorObject>,
    },
    /// Carries a usable id but an unreadable body. The call with this id
    /// is still answered, as a failure.
    MalformedReply { id: u64, reason: String },
    /// Unsolicited event.
    Event(Event),
}

impl Frame {
    /// Parse one inbound text message.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = JsonCodec::decode(text)?;
        let Value::Object(mut obj) = value else {
            return Err(SessionError::Protocol("frame is not a JSON object".into()));
        };

        match obj.get("id") {
            None | Some(Value::Null) => Self::parse_event(obj),
            Some(id) => {
                let id = id.as_u64().ok_or_else(|| {
                    SessionError::Protocol(format!("reply id is not an unsigned integer: {id}"))
                })?;
                if let Some(error) = obj.remove("error") {
                    return Ok(match serde_json::from_value::<RpcErrorObject>(error) {
                        Ok(error) => Frame::Reply {
                            id,
                            outcome: Err(error),
                        },
                        Err(e) => Frame::MalformedReply {
                            id,
                            reason: format!("malformed error object for id {id}: {e}"),
                        },
                    });
                }
                match obj.remove("result") {
                    Some(result) => Ok(Frame::Reply {
                        id,
                        outcome: Ok(result),
                    }),
                    None if obj.contains_key("method") => Err(SessionError::Protocol(format!(
                        "backend-initiated request {id} is not supported"
                    ))),
                    None => Ok(Frame::MalformedReply {
                        id,
                        reason: format!("reply {id} has neither result nor error"),
                    }),
                }
            }
        }
    }

    fn parse_event(mut obj: Map<String, Value>) -> Result<Self> {
        if let Some(error) = obj.get("error") {
            // Backend could not even read one of our frames.
            return Err(SessionError::Protocol(format!(
                "backend reported an uncorrelated error: {error}"
            )));
        }
        let method = match obj.remove("method") {
            Some(Value::String(m)) => m,
            Some(other) => {
                return Err(SessionError::Protocol(format!(
                    "event method is not a string: {other}"
                )))
            }
            None => return Err(SessionError::Protocol("frame has neither id nor method".into())),
        };
        let params = obj.remove("params").unwrap_or(Value::Null);
        Ok(Frame::Event(Event { method, params }))
    }

    /// The id this frame answers, if it is a reply.
    #[inline]
    pub fn reply_id(&self) -> Option<u64> {
        match self {
            Frame::Reply { id, .. } | Frame::MalformedReply { id, .. } => Some(*id),
            Frame::Event(_) => None,
        }
    }

    /// Check if this is an event.
    #[inline]
    pub fn is_event(&self) -> bool {
        matches!(self, Frame::Event(_))
    }
}
