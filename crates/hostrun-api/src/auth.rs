//! API key authentication middleware.
//!
//! Accepts the key in `X-API-Key` or as `Authorization: Bearer <key>`.
//! `/` and `/health` stay public.

use crate::error::ErrorBody;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

const PUBLIC_PATHS: &[&str] = &["/", "/health"];

/// Constant-time key comparison.
fn keys_match(expected: &[u8], provided: &[u8]) -> bool {
    expected.ct_eq(provided).into()
}

/// Extract the caller's key from either supported header.
fn provided_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
}

/// Reject requests without a valid key when one is configured.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.security.api_key.as_deref() else {
        return next.run(request).await;
    };
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let provided = provided_key(request.headers());
    let key_present = provided.is_some();
    let authorized = provided.is_some_and(|key| keys_match(expected.as_bytes(), key.as_bytes()));
    if authorized {
        return next.run(request).await;
    }

    tracing::warn!(
        path = %request.uri().path(),
        key_present,
        "Rejected request with invalid API key"
    );
    let mut body = ErrorBody::new("Unauthorized", "INVALID_API_KEY");
    body.details = Some(serde_json::json!({ "message": "Valid API key required" }));
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
