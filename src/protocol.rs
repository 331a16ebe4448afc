//! JSON-RPC 2.0 wire types shared by both transports.
//!
//! The stdio adapter carries one frame per line; the HTTP adapter carries one
//! frame per POST body and fans responses out over SSE. Both deserialize into
//! [`RpcRequest`] and serialize [`RpcResponse`] back out, so the dispatcher
//! never sees transport-specific framing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only protocol version we speak.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision advertised by `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

// Standard JSON-RPC 2.0 error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// A single inbound JSON-RPC frame: request or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    /// Absent for notifications. May be a number or a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.to_string()
}

impl RpcRequest {
    /// Notifications carry no `id` and must never receive a response.
    /// An explicit `"id": null` is treated the same way.
    pub fn is_notification(&self) -> bool {
        matches!(self.id, None | Some(Value::Null))
    }
}

/// A single outbound JSON-RPC frame. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Envelope for a body that never parsed into a request; the `id` is
    /// unknowable, so it is `null` per the JSON-RPC spec.
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::failure(Value::Null, PARSE_ERROR, detail)
    }
}
