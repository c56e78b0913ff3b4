//! Integration tests for the HTTP API.
//!
//! Each test binds a real server on a random port so that
//! `ConnectInfo<SocketAddr>` is populated for the rate limiter.

use hostrun_api::{AppState, create_router};
use hostrun_config::{LogFormat, RunnerConfig, SecurityConfig};
use hostrun_mcp::{SessionManager, SessionSettings};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

fn test_config() -> RunnerConfig {
    RunnerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        log_level: "info".to_string(),
        log_format: LogFormat::Pretty,
        security: SecurityConfig::default(),
        session: SessionSettings::default(),
        config_file: None,
        warnings: Vec::new(),
    }
}

async fn start_test_server() -> String {
    start_with_config(test_config()).await
}

/// Spin up a server for `config` and return its base URL.
async fn start_with_config(config: RunnerConfig) -> String {
    let manager = Arc::new(SessionManager::new(config.session.clone()));
    let state = Arc::new(AppState::new(manager, config));
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    format!("http://{}", addr)
}

/// GET a path and return (status, body as JSON).
async fn get(base: &str, path: &str) -> (u16, serde_json::Value) {
    let resp = reqwest::Client::new()
        .get(format!("{}{}", base, path))
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

/// POST a JSON body and return (status, body as JSON).
async fn post_json(base: &str, path: &str, body: serde_json::Value) -> (u16, serde_json::Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

/// The fixture server is built next to this test binary when the whole
/// workspace is under test. `HOSTRUN_FIXTURE_SERVER` points elsewhere.
fn fixture_server() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("HOSTRUN_FIXTURE_SERVER") {
        return Some(PathBuf::from(path));
    }
    let exe = std::env::current_exe().ok()?;
    let profile_dir = exe.parent()?.parent()?;
    let candidate =
        profile_dir.join(format!("mcp-fixture-server{}", std::env::consts::EXE_SUFFIX));
    candidate.exists().then_some(candidate)
}

fn missing_binary_config() -> serde_json::Value {
    serde_json::json!({
        "name": "ghost",
        "command": "/definitely/not/a/real/mcp-server",
        "args": [],
    })
}

// ============================================================================
// Health & stats
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let base = start_test_server().await;
    let (status, body) = get(&base, "/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_sessions"], 0);

    let (status, root) = get(&base, "/").await;
    assert_eq!(status, 200);
    assert_eq!(root["status"], "healthy");
}

#[tokio::test]
async fn test_stats_hide_api_key() {
    let mut config = test_config();
    config.security.api_key = Some("sk-secret".to_string());
    let base = start_with_config(config).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/stats", base))
        .header("x-api-key", "sk-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body = resp.text().await.unwrap();
    assert!(!body.contains("sk-secret"));

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["config"]["api_key_configured"], true);
    assert_eq!(json["mcp"]["active_sessions"], 0);
}

#[tokio::test]
async fn test_security_headers_and_request_id() {
    let base = start_test_server().await;
    let resp = reqwest::Client::new()
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap();
    let headers = resp.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("x-request-id"));
}

// ============================================================================
// Session endpoints without a live server
// ============================================================================

#[tokio::test]
async fn test_status_of_unknown_session() {
    let base = start_test_server().await;
    let (status, body) = get(&base, "/mcp/status/nobody").await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_stop_unknown_session() {
    let base = start_test_server().await;
    let (status, body) = post_json(
        &base,
        "/mcp/stop?session_id=nobody",
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "not_found");
}

#[tokio::test]
async fn test_execute_without_session_or_config() {
    let base = start_test_server().await;
    let (status, body) = post_json(
        &base,
        "/mcp/execute",
        serde_json::json!({ "session_id": "s1", "tool_name": "echo" }),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn test_validation_errors() {
    let base = start_test_server().await;
    let (status, body) = post_json(
        &base,
        "/mcp/discover",
        serde_json::json!({
            "session_id": "  ",
            "agent_id": "agent",
            "mcp_config": missing_binary_config(),
        }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = post_json(
        &base,
        "/mcp/execute",
        serde_json::json!({ "session_id": "s1", "tool_name": "" }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_launch_failure_lifecycle() {
    let base = start_test_server().await;
    let discover = serde_json::json!({
        "session_id": "s1",
        "agent_id": "agent",
        "mcp_config": missing_binary_config(),
    });

    let (status, body) = post_json(&base, "/mcp/discover", discover.clone()).await;
    assert_eq!(status, 502);
    assert_eq!(body["code"], "LAUNCH_ERROR");

    let (_, body) = get(&base, "/mcp/status/s1").await;
    assert_eq!(body["state"], "FAILED");

    let (status, body) = post_json(&base, "/mcp/discover", discover).await;
    assert_eq!(status, 409);
    assert_eq!(body["code"], "SESSION_FAILED");

    let (status, body) =
        post_json(&base, "/mcp/stop?session_id=s1", serde_json::json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "stopped");

    let (status, body) = get(&base, "/mcp/status/s1").await;
    assert_eq!(status, 200);
    assert_eq!(body["state"], "STOPPED");
}

// ============================================================================
// Middleware
// ============================================================================

#[tokio::test]
async fn test_api_key_required() {
    let mut config = test_config();
    config.security.api_key = Some("sk-test".to_string());
    let base = start_with_config(config).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/mcp/active-sessions", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_API_KEY");

    let resp = client
        .get(format!("{}/mcp/active-sessions", base))
        .header("authorization", "Bearer sk-test")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    // Health stays public.
    let (status, _) = get(&base, "/health").await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_rate_limit_exceeded() {
    let mut config = test_config();
    config.security.rate_limit_per_minute = 3;
    let base = start_with_config(config).await;

    for _ in 0..3 {
        let (status, _) = get(&base, "/health").await;
        assert_eq!(status, 200);
    }

    let resp = reqwest::Client::new()
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 429);
    assert_eq!(resp.headers()["retry-after"], "60");
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn test_rate_limit_disabled() {
    let mut config = test_config();
    config.security.rate_limit_enabled = false;
    config.security.rate_limit_per_minute = 1;
    let base = start_with_config(config).await;

    for _ in 0..5 {
        let (status, _) = get(&base, "/health").await;
        assert_eq!(status, 200);
    }
}

// ============================================================================
// Full flow against the fixture server
// ============================================================================

#[tokio::test]
async fn test_discover_execute_stop_flow() {
    let Some(fixture) = fixture_server() else {
        eprintln!("mcp-fixture-server not built, skipping");
        return;
    };
    let base = start_test_server().await;
    let config = serde_json::json!({
        "name": "fixture",
        "command": fixture.to_string_lossy(),
    });

    let (status, body) = post_json(
        &base,
        "/mcp/discover",
        serde_json::json!({
            "session_id": "flow",
            "agent_id": "agent-1",
            "mcp_config": config,
        }),
    )
    .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["status"], "success");
    assert_eq!(body["cached"], false);
    let names: Vec<&str> = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"echo"));

    let (status, body) = post_json(
        &base,
        "/mcp/execute",
        serde_json::json!({
            "session_id": "flow",
            "tool_name": "echo",
            "arguments": { "text": "hello" },
        }),
    )
    .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["result"]["content"][0]["text"], "hello");

    let (status, body) = post_json(
        &base,
        "/mcp/execute",
        serde_json::json!({ "session_id": "flow", "tool_name": "fail" }),
    )
    .await;
    assert_eq!(status, 422);
    assert_eq!(body["code"], "TOOL_EXECUTION_ERROR");

    let (_, body) = get(&base, "/mcp/active-sessions").await;
    assert_eq!(body["total_count"], 1);
    assert_eq!(body["sessions"][0]["session_id"], "flow");

    let (_, body) = get(&base, "/mcp/status/flow").await;
    assert_eq!(body["state"], "READY");

    let (_, body) = post_json(&base, "/mcp/stop?session_id=flow", serde_json::json!({})).await;
    assert_eq!(body["status"], "stopped");

    let (_, body) = get(&base, "/mcp/active-sessions").await;
    assert_eq!(body["total_count"], 0);
}
