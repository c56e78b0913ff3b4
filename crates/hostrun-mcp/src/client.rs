//! MCP client: speaks the protocol over one server connection.
//!
//! Handles the MCP protocol handshake (initialize + initialized notification),
//! tool discovery (tools/list), and tool invocation (tools/call). Payloads are
//! validated here so the rest of the crate only sees typed values.

use crate::error::McpError;
use crate::jsonrpc::{JsonRpcResponse, ServerNotification};
use crate::process::ProcessHandle;
use crate::settings::SessionSettings;
use crate::transport::StdioTransport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

/// MCP protocol version we request.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Protocol versions we accept from a server.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Upper bound on `tools/list` pages, guarding against a cursor loop.
const MAX_TOOL_PAGES: usize = 100;

/// Deadlines for each kind of request.
#[derive(Debug, Clone, Copy)]
pub struct ClientTimeouts {
    pub handshake: Duration,
    pub request: Duration,
    pub call: Duration,
}

impl From<&SessionSettings> for ClientTimeouts {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            handshake: settings.handshake_timeout,
            request: settings.request_timeout,
            call: settings.call_timeout,
        }
    }
}

/// Name and version a server reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default = "unknown_version")]
    pub version: String,
}

fn unknown_version() -> String {
    "unknown".to_string()
}

/// Outcome of a successful handshake.
#[derive(Debug, Clone)]
pub struct ServerCapabilities {
    pub protocol_version: String,
    pub server_info: ServerInfo,
    pub capabilities: serde_json::Value,
    pub instructions: Option<String>,
}

impl ServerCapabilities {
    pub fn supports_tools(&self) -> bool {
        self.capabilities.get("tools").is_some()
    }
}

/// A tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "default_schema")]
    pub input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A content item in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: serde_json::Value,
    },
}

/// A content item, with kinds we don't model kept as raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolContent {
    Known(ContentItem),
    Other(serde_json::Value),
}

impl ToolContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ToolContent::Known(ContentItem::Text { text }) => Some(text),
            _ => None,
        }
    }
}

/// Result of calling a tool on an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(
        rename = "structuredContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<serde_json::Value>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    /// All text items joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ToolContent::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Deserialization helpers for MCP protocol messages.
#[derive(Deserialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    protocol_version: String,
    #[serde(default)]
    capabilities: serde_json::Value,
    #[serde(rename = "serverInfo")]
    server_info: ServerInfo,
    #[serde(default)]
    instructions: Option<String>,
}

#[derive(Deserialize)]
struct ToolsListResult {
    tools: Vec<ToolDescriptor>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

fn validate_tool(tool: ToolDescriptor) -> Result<ToolDescriptor, McpError> {
    if tool.name.trim().is_empty() {
        return Err(McpError::Protocol(
            "tools/list returned a tool without a name".to_string(),
        ));
    }
    if !tool.input_schema.is_object() {
        return Err(McpError::Protocol(format!(
            "tool '{}' has a non-object inputSchema",
            tool.name
        )));
    }
    Ok(tool)
}

/// Client for a single MCP server connection.
pub struct McpClient {
    name: String,
    transport: StdioTransport,
    timeouts: ClientTimeouts,
}

impl McpClient {
    pub fn new(name: impl Into<String>, transport: StdioTransport, timeouts: ClientTimeouts) -> Self {
        Self {
            name: name.into(),
            transport,
            timeouts,
        }
    }

    /// Bind a client to a launched process's stdio.
    pub fn attach(
        name: impl Into<String>,
        process: &mut ProcessHandle,
        timeouts: ClientTimeouts,
    ) -> Result<Self, McpError> {
        let name = name.into();
        let (stdin, stdout) = process
            .take_stdio()
            .ok_or_else(|| McpError::Protocol(format!("stdio of '{name}' is already in use")))?;
        let transport = StdioTransport::new(name.clone(), stdout, stdin);
        Ok(Self::new(name, transport, timeouts))
    }

    /// Run the initialize handshake.
    ///
    /// Every failure, including a timeout, is reported as `Handshake`.
    pub async fn handshake(&self) -> Result<ServerCapabilities, McpError> {
        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "hostrun",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = self
            .transport
            .send_request("initialize", Some(init_params), self.timeouts.handshake)
            .await
            .map_err(|e| self.handshake_error(e.to_string()))?;

        if let Some(err) = resp.error {
            return Err(self.handshake_error(format!(
                "server rejected initialize (code {}): {}",
                err.code, err.message
            )));
        }
        let result = resp
            .result
            .ok_or_else(|| self.handshake_error("empty initialize result"))?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| self.handshake_error(format!("malformed initialize result: {e}")))?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
            return Err(self.handshake_error(format!(
                "unsupported protocol version '{}'",
                init.protocol_version
            )));
        }

        self.transport
            .send_notification("notifications/initialized", None)
            .await
            .map_err(|e| self.handshake_error(e.to_string()))?;

        tracing::info!(
            server = %self.name,
            remote = %init.server_info.name,
            version = %init.server_info.version,
            protocol = %init.protocol_version,
            "MCP handshake complete"
        );

        Ok(ServerCapabilities {
            protocol_version: init.protocol_version,
            server_info: init.server_info,
            capabilities: init.capabilities,
            instructions: init.instructions,
        })
    }

    /// Discover the server's tools, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.take().map(|c| serde_json::json!({ "cursor": c }));
            let resp = self
                .transport
                .send_request("tools/list", params, self.timeouts.request)
                .await?;
            let result = self.expect_result("tools/list", resp)?;

            let page: ToolsListResult = serde_json::from_value(result).map_err(|e| {
                McpError::Protocol(format!("Failed to parse tools/list response: {e}"))
            })?;
            for tool in page.tools {
                tools.push(validate_tool(tool)?);
            }

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => {
                    tracing::debug!(server = %self.name, count = tools.len(), "Listed tools");
                    return Ok(tools);
                }
            }
        }

        Err(McpError::Protocol(format!(
            "tools/list did not finish after {MAX_TOOL_PAGES} pages"
        )))
    }

    /// Call a tool on this server.
    ///
    /// A JSON-RPC error or a result flagged `isError` becomes `ToolExecution`.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, McpError> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let resp = self
            .transport
            .send_request("tools/call", Some(params), self.timeouts.call)
            .await?;

        if let Some(err) = resp.error {
            return Err(McpError::ToolExecution {
                tool: tool_name.to_string(),
                message: err.message,
                payload: Some(serde_json::json!({ "code": err.code, "data": err.data })),
            });
        }

        let result = resp.result.ok_or_else(|| {
            McpError::Protocol("tools/call response has neither result nor error".to_string())
        })?;
        let call_result: ToolResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/call result: {e}")))?;

        if call_result.is_error {
            let text = call_result.text();
            return Err(McpError::ToolExecution {
                tool: tool_name.to_string(),
                message: if text.is_empty() {
                    "tool reported an error".to_string()
                } else {
                    text
                },
                payload: serde_json::to_value(&call_result.content).ok(),
            });
        }

        Ok(call_result)
    }

    /// Notifications pushed by the server.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<ServerNotification> {
        self.transport.subscribe_notifications()
    }

    pub async fn is_open(&self) -> bool {
        self.transport.is_open().await
    }

    /// Get the server name.
    pub fn server_name(&self) -> &str {
        &self.name
    }

    /// Close the connection; pending requests fail with `ConnectionClosed`.
    pub async fn close(&self) {
        self.transport.close().await;
    }

    fn expect_result(
        &self,
        method: &str,
        resp: JsonRpcResponse,
    ) -> Result<serde_json::Value, McpError> {
        if let Some(err) = resp.error {
            return Err(McpError::Protocol(format!(
                "{method} failed on '{}' (code {}): {}",
                self.name, err.code, err.message
            )));
        }
        resp.result
            .ok_or_else(|| McpError::Protocol(format!("{method} response has no result")))
    }

    fn handshake_error(&self, reason: impl Into<String>) -> McpError {
        McpError::Handshake {
            server: self.name.clone(),
            reason: reason.into(),
        }
    }
}
