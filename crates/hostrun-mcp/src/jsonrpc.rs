//! JSON-RPC 2.0 types for MCP communication.

use serde::{Deserialize, Serialize};

/// Standard "method not found" error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response to one of our requests.
#[derive(Debug, Clone)]
pub struct JsonRpcResponse {
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// Our reply to a request the server sent us.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcReply {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcReply {
    pub fn result(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn method_not_found(id: serde_json::Value, method: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {method}"),
                data: None,
            }),
        }
    }
}

/// A notification pushed by the server.
#[derive(Debug, Clone)]
pub struct ServerNotification {
    pub method: String,
    pub params: Option<serde_json::Value>,
}

/// Any message read from the server, before classification.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// A classified message from the server.
#[derive(Debug, Clone)]
pub enum Incoming {
    Response(JsonRpcResponse),
    Notification(ServerNotification),
    Request {
        id: serde_json::Value,
        method: String,
        params: Option<serde_json::Value>,
    },
    /// An error the server could not tie to a request (`"id": null`),
    /// typically its answer to a line it failed to parse.
    UnroutedError(JsonRpcError),
}

impl Incoming {
    /// Parse one line of server output.
    ///
    /// Anything that is not valid JSON-RPC (including responses whose id we
    /// could never have issued) is a protocol violation.
    pub fn parse(line: &str) -> Result<Self, String> {
        let raw: RawMessage =
            serde_json::from_str(line).map_err(|e| format!("invalid JSON-RPC message: {e}"))?;

        match (raw.method, raw.id) {
            (Some(method), Some(id)) => Ok(Incoming::Request {
                id,
                method,
                params: raw.params,
            }),
            (Some(method), None) => Ok(Incoming::Notification(ServerNotification {
                method,
                params: raw.params,
            })),
            (None, Some(id)) => {
                let id = id
                    .as_u64()
                    .ok_or_else(|| format!("response id {id} is not a request id we issued"))?;
                if raw.result.is_none() && raw.error.is_none() {
                    return Err(format!("response {id} has neither result nor error"));
                }
                Ok(Incoming::Response(JsonRpcResponse {
                    id,
                    result: raw.result,
                    error: raw.error,
                }))
            }
            (None, None) => match raw.error {
                Some(error) => Ok(Incoming::UnroutedError(error)),
                None => Err("message has neither method nor id".to_string()),
            },
        }
    }
}
