use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use sqlx::SqlitePool;

/// Simple per-IP rate limiter
pub struct RateLimiter {
    /// Maps IP → (request count, window start)
    limits: DashMap<String, (u32, Instant)>,
    max_requests: u32,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            limits: DashMap::new(),
            max_requests,
            window_secs,
        }
    }

    /// Returns true if the request is allowed, false if rate-limited.
    pub fn check(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.limits.entry(ip.to_string()).or_insert((0, now));
        let (count, window_start) = entry.value_mut();
        if now.duration_since(*window_start).as_secs() >= self.window_secs {
            // Reset window
            *count = 1;
            *window_start = now;
            true
        } else if *count < self.max_requests {
            *count += 1;
            true
        } else {
            false
        }
    }

    /// Periodically clean up old entries (call from a background task)
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.limits.retain(|_, (_, start)| {
            now.duration_since(*start).as_secs() < self.window_secs * 2
        });
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// JWT signing secret
    pub jwt_secret: String,
    /// One lifetime for every session, admin or user.
    pub session_ttl_hours: i64,
    /// Rate limiter for auth endpoints (login/register)
    pub auth_rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(db: SqlitePool, jwt_secret: String, session_ttl_hours: i64) -> Self {
        Self {
            db,
            jwt_secret,
            session_ttl_hours,
            auth_rate_limiter: Arc::new(RateLimiter::new(10, 60)), // 10 req/min per IP
        }
    }
}
