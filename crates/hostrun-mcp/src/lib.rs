//! MCP server session orchestration.
//!
//! Launches stdio MCP servers on behalf of callers, keyed by a caller-chosen
//! session id. Each session owns one subprocess speaking newline-delimited
//! JSON-RPC 2.0; the manager handshakes it, discovers and caches its tools,
//! forwards tool calls, and tears it down on stop, failure, or idleness.

pub mod cache;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod process;
pub mod session;
pub mod settings;
mod transport;

pub use cache::ToolCache;
pub use cleanup::CleanupScheduler;
pub use client::{
    ContentItem, McpClient, ServerCapabilities, ServerInfo, ToolContent, ToolDescriptor,
    ToolResult,
};
pub use config::{Fingerprint, ServerConfig};
pub use error::McpError;
pub use process::{Platform, ProcessHandle, resolve_command};
pub use session::{
    CleanupReport, Discovery, ManagerStats, SessionManager, SessionState, SessionStatus,
    SessionSummary,
};
pub use settings::{LaunchDefaults, SessionSettings};
pub use transport::StdioTransport;
