//! Error types for MCP server orchestration.

use thiserror::Error;

/// Errors from launching, talking to, and managing MCP server sessions.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to launch MCP server '{command}': {source}")]
    Launch {
        command: String,
        source: std::io::Error,
    },

    #[error("MCP handshake with '{server}' failed: {reason}")]
    Handshake { server: String, reason: String },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP request '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution {
        tool: String,
        message: String,
        /// Server-reported payload (JSON-RPC error data or result content).
        payload: Option<serde_json::Value>,
    },

    #[error("Session '{session_id}' was started with a different server configuration")]
    SessionConfigMismatch {
        session_id: String,
        running: String,
        requested: String,
    },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session '{session_id}' has failed ({reason}); stop it before reuse")]
    SessionFailed { session_id: String, reason: String },

    #[error("MCP connection closed")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether this error leaves the underlying connection unusable.
    ///
    /// Fatal errors move a session to `Failed`. Timeouts and tool-level
    /// failures are per-call and leave the session usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            McpError::Launch { .. }
                | McpError::Handshake { .. }
                | McpError::Protocol(_)
                | McpError::ConnectionClosed
                | McpError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_call_errors_are_not_fatal() {
        let timeout = McpError::Timeout {
            operation: "tools/call".into(),
            timeout_ms: 100,
        };
        let tool = McpError::ToolExecution {
            tool: "read_file".into(),
            message: "not found".into(),
            payload: None,
        };
        assert!(!timeout.is_fatal());
        assert!(!tool.is_fatal());
    }

    #[test]
    fn transport_errors_are_fatal() {
        assert!(McpError::ConnectionClosed.is_fatal());
        assert!(McpError::Protocol("bad frame".into()).is_fatal());
        assert!(
            McpError::Handshake {
                server: "fs".into(),
                reason: "version".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn session_errors_render_id() {
        let err = McpError::SessionFailed {
            session_id: "s1".into(),
            reason: "connection closed".into(),
        };
        assert!(err.to_string().contains("s1"));
        assert!(err.to_string().contains("connection closed"));
    }
}
