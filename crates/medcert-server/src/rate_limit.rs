//! Fixed-window rate limiting for the lookup endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::ApiError;

/// Key used when the connection carries no peer address.
const UNKNOWN_PEER: &str = "unknown";

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Counts requests per client key in windows of fixed length.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<String, Window>,
    trust_forwarded_for: bool,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
            trust_forwarded_for: false,
        }
    }

    /// Key clients by the first `X-Forwarded-For` address. Only for
    /// deployments behind a proxy that overwrites the header.
    #[must_use]
    pub fn trusting_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self::new(cfg.limit, cfg.window()).trusting_forwarded_for(cfg.trust_forwarded_for)
    }

    /// Number of client windows currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Records a request for `key`. Returns the time left in the current
    /// window when the limit is already reached.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        let window = entry.value_mut();

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }
        if window.count >= self.limit {
            let elapsed = now.duration_since(window.started);
            return Err(self.window.saturating_sub(elapsed));
        }
        window.count += 1;
        Ok(())
    }

    /// Drops windows that already ended.
    pub fn prune(&self) {
        let now = Instant::now();
        let window = self.window;
        self.windows
            .retain(|_, w| now.duration_since(w.started) < window);
    }
}

/// Client key: the peer IP, or the first `X-Forwarded-For` address when
/// the proxy is trusted and the header is present.
pub fn client_key(req: &Request<Body>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_PEER.to_string())
}

pub async fn rate_limit(
    State(limiter): State<Arc<FixedWindowLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = client_key(&req, limiter.trust_forwarded_for);
    match limiter.check(&key) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => {
            tracing::warn!(client = %key, path = %req.uri().path(), "Rate limit exceeded");
            // Round up so clients never retry inside the window
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            ApiError::too_many_requests(secs.max(1)).into_response()
        }
    }
}
