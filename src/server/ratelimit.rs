//! Per-client request rate limiting
//!
//! Each client IP gets a fixed budget of requests per window. The window
//! starts with the first request and resets once it has elapsed.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::response::ApiError;
use crate::config::RateLimitSettings;
use crate::otel::Metrics;

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per client within one window
    pub max_requests: u32,

    /// Window length
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            max_requests: settings.requests_per_window,
            window: Duration::from_secs(settings.window_secs),
        }
    }
}

#[derive(Debug, Clone)]
struct WindowEntry {
    count: u32,
    started: Instant,
}

/// Fixed-window rate limiter keyed by client IP
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: RwLock<HashMap<IpAddr, WindowEntry>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create a new rate limiter with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }

    /// Count a request from `ip`
    ///
    /// Returns `true` if the request is within budget.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        let entry = entries.entry(ip).or_insert(WindowEntry {
            count: 0,
            started: now,
        });

        if now.duration_since(entry.started) >= self.config.window {
            entry.count = 0;
            entry.started = now;
        }

        if entry.count >= self.config.max_requests {
            return false;
        }

        entry.count += 1;
        true
    }

    /// Requests `ip` may still make in the current window
    pub fn remaining(&self, ip: IpAddr) -> u32 {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());

        match entries.get(&ip) {
            Some(entry) if entry.started.elapsed() < self.config.window => {
                self.config.max_requests.saturating_sub(entry.count)
            }
            _ => self.config.max_requests,
        }
    }

    /// Forget `ip`
    pub fn reset(&self, ip: IpAddr) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&ip);
    }

    /// Drop entries whose window has elapsed
    ///
    /// Should be called periodically to free memory
    pub fn cleanup(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let window = self.config.window;
        entries.retain(|_, entry| entry.started.elapsed() < window);
    }

    /// Get current number of tracked IPs
    pub fn tracked_ips_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.config.window
    }
}

/// State for [`rate_limit_middleware`]
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
}

/// Rate limiting middleware function
///
/// Requests without a known peer address pass through unchecked.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if let Some(ip) = peer {
        if !state.limiter.check(ip) {
            tracing::warn!(remote = %ip, path = %request.uri().path(), "Rate limit exceeded");
            state.metrics.record_rate_limited();
            return ApiError::TooManyRequests.into_response();
        }
    }

    next.run(request).await
}
