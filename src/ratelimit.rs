//! Fixed-window per-client rate limiting
//!
//! A minimal counter keyed by client IP (or trusted proxy header). Applied
//! strictly before the WebSocket upgrade and around the rendezvous HTTP
//! endpoints, so a rejected caller never creates partial session state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use parking_lot::Mutex;

/// Fixed-window limiter: at most `per_window` requests per key per window.
pub struct Limiter {
    per_window: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    count: u32,
    reset: Instant,
}

impl Limiter {
    /// One-minute windows, matching the `*_RATE_PER_MIN` configuration.
    pub fn per_minute(per_min: u32) -> Self {
        Self::with_window(per_min, Duration::from_secs(60))
    }

    pub fn with_window(per_window: u32, window: Duration) -> Self {
        Self {
            per_window,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a request for `key` is allowed right now.
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .entry(key.to_owned())
            .or_insert_with(|| Bucket { count: 0, reset: now + self.window });
        if now >= bucket.reset {
            bucket.count = 0;
            bucket.reset = now + self.window;
        }
        if bucket.count >= self.per_window {
            return false;
        }
        bucket.count += 1;
        true
    }
}

/// Best-effort client key: the left-most `X-Forwarded-For` entry if present
/// (trusted proxy deployments), else the transport peer address.
pub fn client_key(headers: &HeaderMap, addr: Option<SocketAddr>) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let first = xff.split(',').next().unwrap_or(xff).trim();
        if !first.is_empty() {
            return first.to_owned();
        }
    }
    match addr {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_owned(),
    }
}
