//! Rate limiting.
//!
//! Two layers: a global request limiter applied as router middleware, and a
//! keyed fixed-window limiter that bounds connection attempts per credential
//! so repeated bad logins cannot burn a platform's session budget.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Rate limiter configuration
pub struct RateLimiterConfig {
    /// Maximum requests per minute
    pub requests_per_minute: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 100, // Default: 100 requests per minute
        }
    }
}

/// Global rate limiter
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a new rate limiter
pub fn create_rate_limiter(config: RateLimiterConfig) -> GlobalRateLimiter {
    let quota = Quota::per_minute(
        NonZeroU32::new(config.requests_per_minute).expect("Requests per minute must be non-zero"),
    );
    Arc::new(RateLimiter::direct(quota))
}

/// Middleware to apply rate limiting
pub async fn rate_limit_middleware(
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    request: Request,
    next: Next,
) -> Response {
    match limiter.check() {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!("Rate limit exceeded");
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded. Please try again later.",
            )
                .into_response()
        }
    }
}

struct WindowEntry {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window attempt limiter keyed by caller identity.
///
/// The window starts on the first attempt for a key and is not sliding: once
/// it expires the next attempt opens a fresh window. Blocked attempts do not
/// extend the window.
pub struct ConnectionRateLimiter {
    max_attempts: u32,
    window: Duration,
    entries: Mutex<HashMap<String, WindowEntry>>,
}

impl ConnectionRateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if the attempt is allowed and records it.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        match entries.get_mut(key) {
            Some(entry) if now <= entry.reset_at => {
                if entry.count >= self.max_attempts {
                    return false;
                }
                entry.count += 1;
                true
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    WindowEntry {
                        count: 1,
                        reset_at: now + self.window,
                    },
                );
                true
            }
        }
    }

    /// Attempts left in the current window; full budget once it expires.
    pub fn remaining_attempts(&self, key: &str) -> u32 {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        match entries.get(key) {
            Some(entry) if now <= entry.reset_at => {
                self.max_attempts.saturating_sub(entry.count)
            }
            _ => self.max_attempts,
        }
    }

    /// How long until the key's window resets; zero for unknown keys.
    pub fn time_until_reset(&self, key: &str) -> Duration {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        match entries.get(key) {
            Some(entry) => entry.reset_at.saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

impl Default for ConnectionRateLimiter {
    // 5 attempts per 15 minutes
    fn default() -> Self {
        Self::new(5, Duration::from_secs(15 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let config = RateLimiterConfig {
            requests_per_minute: 50,
        };
        let limiter = create_rate_limiter(config);

        // Should allow first request
        assert!(limiter.check().is_ok());
    }

    #[test]
    fn test_default_config() {
        let config = RateLimiterConfig::default();
        assert_eq!(config.requests_per_minute, 100);
    }

    #[test]
    fn test_connection_limiter_caps_attempts() {
        let limiter = ConnectionRateLimiter::new(5, Duration::from_secs(60));

        for _ in 0..5 {
            assert!(limiter.check("user:mt5:123"));
        }
        assert!(!limiter.check("user:mt5:123"));
        assert_eq!(limiter.remaining_attempts("user:mt5:123"), 0);

        // Other keys are unaffected
        assert!(limiter.check("user:mt5:456"));
    }

    #[test]
    fn test_connection_limiter_window_reset() {
        let limiter = ConnectionRateLimiter::new(2, Duration::from_millis(30));

        assert!(limiter.check("k"));
        assert!(limiter.check("k"));
        assert!(!limiter.check("k"));

        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(limiter.remaining_attempts("k"), 2);
        assert!(limiter.check("k"));
    }

    #[test]
    fn test_time_until_reset() {
        let limiter = ConnectionRateLimiter::new(1, Duration::from_secs(60));

        assert_eq!(limiter.time_until_reset("unknown"), Duration::ZERO);

        limiter.check("k");
        let left = limiter.time_until_reset("k");
        assert!(left > Duration::from_secs(55) && left <= Duration::from_secs(60));
    }
}
