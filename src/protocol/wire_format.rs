//! Outbound wire shapes and the shared error object.
//!
//! Every message is one JSON document carried in one WebSocket text frame.
//!
//! ```text
//! Request       {"id": 7, "method": "task.start", "params": {...}}
//! Notification  {"method": "ui.focus", "params": {...}}
//! Reply         {"id": 7, "result": ...} | {"id": 7, "error": {"code", "message", "data"?}}
//! Event         {"method": "task.progress", "params"?: {...}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error object carried by a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl std::fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.message)
    }
}

fn is_null(params: &&Value) -> bool {
    params.is_null()
}

/// Outbound request frame. Expects exactly one reply.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "is_null")]
    pub params: &'a Value,
}

/// Outbound fire-and-forget frame. No id, no reply.
#[derive(Debug, Serialize)]
pub struct Notification<'a> {
    pub method: &'a str,
    #[serde(skip_serializing_if = "is_null")]
    pub params: &'a Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let params = json!({"task": "daily"});
        let req = Request {
            id: 7,
            method: "task.start",
            params: &params,
        };
        let text = serde_json::to_string(&req).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"id": 7, "method": "task.start", "params": {"task": "daily"}})
        );
    }

    #[test]
    fn test_null_params_omitted() {
        let note = Notification {
            method: "ui.ping",
            params: &Value::Null,
        };
        assert_eq!(serde_json::to_string(&note).unwrap(), r#"{"method":"ui.ping"}"#);
    }

    #[test]
    fn test_error_object_optional_data() {
        let err: RpcErrorObject =
            serde_json::from_value(json!({"code": -32000, "message": "busy"})).unwrap();
        assert_eq!(err, RpcErrorObject::new(-32000, "busy"));

        let err = err.with_data(json!({"retry": true}));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["data"]["retry"], json!(true));
    }
}
