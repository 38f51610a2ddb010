//! Per-client request rate limiting.
//!
//! Counters are process-wide state held behind the `RateLimit` trait, so a
//! deployment running several instances can swap in a shared store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use kateno_config::RateLimitConfig;
use tracing::warn;

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window after this one.
    pub remaining: usize,
    /// Seconds until another request would be admitted; 0 when allowed.
    pub retry_after_secs: u64,
}

/// A rate-limit policy keyed by client identifier.
pub trait RateLimit: Send + Sync {
    /// Record a request from `client_key` and decide whether to admit it.
    fn check(&self, client_key: &str) -> RateLimitDecision;
}

/// Entries above which stale clients are evicted on the next check.
const EVICTION_THRESHOLD: usize = 10_000;

/// In-memory sliding-window rate limiter.
///
/// Tracks request timestamps per client key (IP or token).
/// Thread-safe via `std::sync::Mutex` (non-async, held briefly).
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// `check` against an explicit clock reading.
    pub fn check_at(&self, client_key: &str, now: Instant) -> RateLimitDecision {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        if clients.len() > EVICTION_THRESHOLD {
            clients.retain(|_, timestamps| {
                timestamps
                    .last()
                    .is_some_and(|t| now.saturating_duration_since(*t) < self.window)
            });
        }

        let timestamps = clients.entry(client_key.to_string()).or_default();
        timestamps.retain(|t| now.saturating_duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            let retry_after = timestamps
                .first()
                .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(self.window);
            warn!(
                client = %client_key.chars().take(20).collect::<String>(),
                retry_after_secs = ceil_secs(retry_after),
                "Rate limit exceeded"
            );
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after_secs: ceil_secs(retry_after).max(1),
            };
        }

        timestamps.push(now);
        RateLimitDecision {
            allowed: true,
            remaining: self.max_requests - timestamps.len(),
            retry_after_secs: 0,
        }
    }
}

impl RateLimit for RateLimiter {
    fn check(&self, client_key: &str) -> RateLimitDecision {
        self.check_at(client_key, Instant::now())
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
