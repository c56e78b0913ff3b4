//! Application state for the API server.

use crate::rate_limit::RateLimiter;
use chrono::{DateTime, Utc};
use hostrun_config::RunnerConfig;
use hostrun_mcp::SessionManager;
use std::sync::Arc;

/// Shared application state for the API server.
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub config: RunnerConfig,
    /// `None` when rate limiting is disabled.
    pub rate_limiter: Option<RateLimiter>,
    pub started_at: DateTime<Utc>,
    start_time: std::time::Instant,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>, config: RunnerConfig) -> Self {
        let rate_limiter = config
            .security
            .rate_limit_enabled
            .then(|| RateLimiter::per_minute(config.security.rate_limit_per_minute));
        Self {
            manager,
            config,
            rate_limiter,
            started_at: Utc::now(),
            start_time: std::time::Instant::now(),
        }
    }

    /// Get the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
