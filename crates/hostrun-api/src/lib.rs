//! HTTP API for the hostrun MCP session manager.
//!
//! # Endpoints
//!
//! - `POST /mcp/discover` - Start (or reuse) a session and list its tools
//! - `POST /mcp/execute` - Call a tool in a session
//! - `POST /mcp/stop?session_id=` - Stop a session
//! - `GET /mcp/status/{session_id}` - Session lifecycle state
//! - `GET /mcp/active-sessions` - All live sessions
//! - `GET /health`, `GET /` - Health check
//! - `GET /stats` - Manager statistics and effective configuration
//!
//! Middleware, outermost first: request id, tracing, security headers, CORS,
//! rate limiting, API-key auth.

pub mod auth;
pub mod error;
pub mod rate_limit;
pub mod routes;
pub mod state;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, header},
    middleware,
    routing::{get, post},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

pub use error::{ApiError, ErrorBody};
pub use rate_limit::RateLimiter;
pub use state::AppState;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(allowed))
}

/// Create the API router with all routes configured.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.security.cors_origins);

    Router::new()
        .route("/", get(routes::health))
        .route("/health", get(routes::health))
        .route("/stats", get(routes::stats))
        .route("/mcp/discover", post(routes::discover))
        .route("/mcp/execute", post(routes::execute))
        .route("/mcp/stop", post(routes::stop))
        .route("/mcp/status/{session_id}", get(routes::status))
        .route("/mcp/active-sessions", get(routes::active_sessions))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_api_key,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit::limit_requests,
        ))
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn serve<F>(state: Arc<AppState>, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(addr = %listener.local_addr()?, "Starting hostrun API server");

    // Peer addresses feed the rate limiter.
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
