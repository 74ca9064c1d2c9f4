//! # Fixed-Window Rate Limiter
//!
//! Each caller gets `max_requests` per window. The window opens on the
//! caller's first request and resets once it has fully elapsed; there is no
//! sliding. Windows live in a `DashMap`, so the check and the increment for
//! one caller happen under that key's shard lock and concurrent requests
//! from the same caller cannot both slip through on the last slot.
//!
//! Uses `tokio::time::Instant` so tests can drive the clock.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, FromRef, FromRequestParts};
use axum::http::request::Parts;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Request count for one caller in the current window.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub count: u32,
    pub window_start: Instant,
}

/// The caller has used up the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    /// Time until the window resets.
    pub retry_after: Duration,
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    /// Counts one request for `caller`, or refuses it.
    pub fn check(&self, caller: &str) -> Result<(), RateLimited> {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(caller.to_string())
            .or_insert(RateWindow {
                count: 0,
                window_start: now,
            });

        let elapsed = now.duration_since(entry.window_start);
        if elapsed >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= self.max_requests {
            return Err(RateLimited {
                retry_after: self.window.saturating_sub(elapsed),
            });
        }
        entry.count += 1;
        Ok(())
    }

    /// Drops windows that have fully elapsed. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.window_start) < self.window);
        before - self.windows.len()
    }

    pub fn tracked_callers(&self) -> usize {
        self.windows.len()
    }
}

// ---------------------------------------------------------------------------
// Caller Identity
// ---------------------------------------------------------------------------

/// Whether `X-Forwarded-For` names the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedPolicy {
    pub trust_forwarded_for: bool,
}

/// The key a request is rate limited under.
///
/// The first `X-Forwarded-For` entry when the policy trusts it, else the
/// peer IP, else `"unknown"` (only when the server was not started with
/// connect info, as in router tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
    ForwardedPolicy: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let policy = ForwardedPolicy::from_ref(state);
        if policy.trust_forwarded_for {
            let forwarded = parts
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(first) = forwarded {
                return Ok(CallerId(first.to_string()));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(CallerId(peer.unwrap_or_else(|| "unknown".into())))
    }
}
