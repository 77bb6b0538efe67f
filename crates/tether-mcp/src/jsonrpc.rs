//! JSON-RPC 2.0 envelopes exchanged with a server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const VERSION: &str = "2.0";

/// Outgoing call; `id` is unique within one session.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// Reply to a request. Exactly one of `result` and `error` is expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One-way message; carries no id and gets no reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: VERSION,
            method: method.into(),
            params,
        }
    }
}

/// A message received from a server, sorted by shape.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Reply to one of our requests.
    Response(JsonRpcResponse),
    /// Server-initiated notification.
    Notification { method: String },
    /// Server-initiated request. The client supports none of these.
    Request { id: Value, method: String },
}

impl Incoming {
    /// Classify a raw message by the fields it carries.
    pub fn classify(message: Value) -> Result<Self, serde_json::Error> {
        if let Some(method) = message.get("method").and_then(Value::as_str) {
            let method = method.to_string();
            return Ok(match message.get("id") {
                Some(id) if !id.is_null() => Incoming::Request {
                    id: id.clone(),
                    method,
                },
                _ => Incoming::Notification { method },
            });
        }
        serde_json::from_value(message).map(Incoming::Response)
    }
}

/// Standard "method not found" error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Build the reply to a server request the client does not implement.
pub fn method_not_found(id: Value, method: &str) -> Value {
    serde_json::json!({
        "jsonrpc": VERSION,
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not supported by client: {method}"),
        },
    })
}
