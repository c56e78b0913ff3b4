//! Per-client-IP request rate limiting.

use crate::error::ErrorBody;
use crate::state::AppState;
use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Seconds a limited client is told to wait.
const RETRY_AFTER_SECS: u64 = 60;

/// How often idle client entries are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

struct Window {
    requests: HashMap<IpAddr, VecDeque<Instant>>,
    last_sweep: Instant,
}

/// Sliding-window limiter: at most `max_requests` per `window` per IP.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests as usize,
            window,
            state: Mutex::new(Window {
                requests: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Record a request from `ip`. Returns false if it is over the limit.
    pub fn check_request(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();

        if now.duration_since(state.last_sweep) > SWEEP_INTERVAL {
            let window = self.window;
            state.requests.retain(|_, hits| {
                hits.back()
                    .is_some_and(|last| now.duration_since(*last) < window)
            });
            state.last_sweep = now;
        }

        let hits = state.requests.entry(ip).or_default();
        while hits
            .front()
            .is_some_and(|first| now.duration_since(*first) >= self.window)
        {
            hits.pop_front();
        }
        if hits.len() >= self.max_requests {
            return false;
        }
        hits.push_back(now);
        true
    }

    /// Number of client IPs currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.state.lock().requests.len()
    }
}

/// Reject clients over their request budget with 429.
///
/// Requests without connection info (no peer address) are not limited.
pub async fn limit_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limiter) = &state.rate_limiter else {
        return next.run(request).await;
    };
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if let Some(ip) = peer {
        if !limiter.check_request(ip) {
            tracing::warn!(client = %ip, "Rate limit exceeded");
            let mut body = ErrorBody::new("Too Many Requests", "RATE_LIMIT_EXCEEDED");
            body.details = Some(serde_json::json!({ "retry_after": RETRY_AFTER_SECS }));
            let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
            return response;
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn allows_up_to_the_limit() {
        let limiter = RateLimiter::per_minute(5);
        for _ in 0..5 {
            assert!(limiter.check_request(ip(1)));
        }
        assert!(!limiter.check_request(ip(1)));
    }

    #[test]
    fn clients_have_separate_budgets() {
        let limiter = RateLimiter::per_minute(2);
        assert!(limiter.check_request(ip(1)));
        assert!(limiter.check_request(ip(1)));
        assert!(!limiter.check_request(ip(1)));

        assert!(limiter.check_request(ip(2)));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_millis(50));
        assert!(limiter.check_request(ip(1)));
        assert!(!limiter.check_request(ip(1)));
        std::thread::sleep(Duration::from_millis(80));
        assert!(limiter.check_request(ip(1)));
    }
}
