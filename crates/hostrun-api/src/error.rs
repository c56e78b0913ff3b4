//! Error responses for the HTTP layer.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hostrun_mcp::McpError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error("{0}")]
    Validation(String),
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, code: &'static str) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
        }
    }
}

impl ApiError {
    /// Status code and machine-readable code for this error.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::Mcp(err) => match err {
                McpError::SessionNotFound { .. } => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
                McpError::SessionConfigMismatch { .. } => {
                    (StatusCode::CONFLICT, "SESSION_CONFIG_MISMATCH")
                }
                McpError::SessionFailed { .. } => (StatusCode::CONFLICT, "SESSION_FAILED"),
                McpError::ToolExecution { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "TOOL_EXECUTION_ERROR")
                }
                McpError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
                McpError::Launch { .. } => (StatusCode::BAD_GATEWAY, "LAUNCH_ERROR"),
                McpError::Handshake { .. } => (StatusCode::BAD_GATEWAY, "HANDSHAKE_ERROR"),
                McpError::Protocol(_) => (StatusCode::BAD_GATEWAY, "PROTOCOL_ERROR"),
                McpError::ConnectionClosed => (StatusCode::BAD_GATEWAY, "CONNECTION_CLOSED"),
                McpError::Io(_) | McpError::Json(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                }
            },
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::Mcp(McpError::ToolExecution { tool, payload, .. }) => Some(
                serde_json::json!({ "tool": tool, "payload": payload }),
            ),
            ApiError::Mcp(McpError::SessionConfigMismatch {
                running, requested, ..
            }) => Some(serde_json::json!({
                "running_fingerprint": running,
                "requested_fingerprint": requested,
            })),
            ApiError::Mcp(McpError::Timeout { timeout_ms, .. }) => {
                Some(serde_json::json!({ "timeout_ms": timeout_ms }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        if status.is_server_error() {
            tracing::error!(code, "{self}");
        } else {
            tracing::warn!(code, "{self}");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code,
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}
