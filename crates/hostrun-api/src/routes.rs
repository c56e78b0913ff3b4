//! HTTP route handlers.

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
};
use hostrun_mcp::{
    ManagerStats, Platform, ServerConfig, ServerInfo, SessionStatus, SessionSummary,
    ToolDescriptor, ToolResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DiscoverRequest {
    pub session_id: String,
    pub agent_id: String,
    pub mcp_config: ServerConfig,
    /// Skip the tool cache.
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    pub status: &'static str,
    pub tools: Vec<ToolDescriptor>,
    pub server_info: Option<ServerInfo>,
    pub cached: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub session_id: String,
    #[serde(default)]
    pub mcp_config: Option<ServerConfig>,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub status: &'static str,
    pub result: ToolResult,
}

#[derive(Debug, Deserialize)]
pub struct StopParams {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub status: &'static str,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct ActiveSessionsResponse {
    pub sessions: Vec<SessionSummary>,
    pub total_count: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub platform: &'static str,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub mcp: ManagerStats,
    pub config: ConfigSummary,
}

/// Effective configuration with secrets left out.
#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub api_key_configured: bool,
    pub cors_origins: Vec<String>,
    pub rate_limit_enabled: bool,
    pub rate_limit_per_minute: u32,
    pub cache_ttl_secs: u64,
    pub idle_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    pub call_timeout_secs: u64,
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn validate_config(config: &ServerConfig) -> Result<(), ApiError> {
    require_non_empty("mcp_config.name", &config.name)?;
    require_non_empty("mcp_config.command", &config.command)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /mcp/discover
pub async fn discover(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DiscoverRequest>,
) -> Result<Json<DiscoverResponse>, ApiError> {
    require_non_empty("session_id", &req.session_id)?;
    validate_config(&req.mcp_config)?;

    tracing::info!(
        session_id = %req.session_id,
        agent_id = %req.agent_id,
        server = %req.mcp_config.name,
        "Tool discovery request"
    );

    let discovery = state
        .manager
        .discover(&req.session_id, &req.mcp_config, req.refresh)
        .await?;

    Ok(Json(DiscoverResponse {
        status: "success",
        tools: discovery.tools,
        server_info: discovery.server_info,
        cached: discovery.cached,
    }))
}

/// POST /mcp/execute
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    require_non_empty("session_id", &req.session_id)?;
    require_non_empty("tool_name", &req.tool_name)?;
    if let Some(config) = &req.mcp_config {
        validate_config(config)?;
    }

    tracing::info!(
        session_id = %req.session_id,
        tool = %req.tool_name,
        "Tool execution request"
    );

    let result = state
        .manager
        .execute(
            &req.session_id,
            req.mcp_config.as_ref(),
            &req.tool_name,
            serde_json::Value::Object(req.arguments),
        )
        .await?;

    Ok(Json(ExecuteResponse {
        status: "success",
        result,
    }))
}

/// POST /mcp/stop?session_id=...
pub async fn stop(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StopParams>,
) -> Json<StopResponse> {
    let stopped = state.manager.stop(&params.session_id).await;
    Json(StopResponse {
        status: if stopped { "stopped" } else { "not_found" },
        session_id: params.session_id,
    })
}

/// GET /mcp/status/{session_id}
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatus>, ApiError> {
    Ok(Json(state.manager.status(&session_id).await?))
}

/// GET /mcp/active-sessions
pub async fn active_sessions(State(state): State<Arc<AppState>>) -> Json<ActiveSessionsResponse> {
    let sessions = state.manager.list_active().await;
    Json(ActiveSessionsResponse {
        total_count: sessions.len(),
        sessions,
    })
}

/// GET /health and GET /
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        platform: Platform::current().name(),
        uptime_seconds: state.uptime_seconds(),
        active_sessions: state.manager.list_active().await.len(),
    })
}

/// GET /stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let config = &state.config;
    let session = &config.session;
    Json(StatsResponse {
        uptime_seconds: state.uptime_seconds(),
        started_at: state.started_at,
        mcp: state.manager.stats().await,
        config: ConfigSummary {
            host: config.host.clone(),
            port: config.port,
            log_level: config.log_level.clone(),
            api_key_configured: config.security.api_key.is_some(),
            cors_origins: config.security.cors_origins.clone(),
            rate_limit_enabled: config.security.rate_limit_enabled,
            rate_limit_per_minute: config.security.rate_limit_per_minute,
            cache_ttl_secs: session.cache_ttl.as_secs(),
            idle_timeout_secs: session.idle_timeout.as_secs(),
            cleanup_interval_secs: session.cleanup_interval.as_secs(),
            call_timeout_secs: session.call_timeout.as_secs(),
        },
    })
}
