//! Token bucket rate limiter for upstream request throttling.
//!
//! Applied before every provider request so bursts from the per-symbol path
//! stay under the provider's published budget instead of collecting 429s.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket rate limiter.
///
/// Holds up to one second's worth of requests and refills continuously at
/// `requests_per_minute / 60` tokens per second.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
    name: String,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Example
    /// ```
    /// use sift_screener::data::RateLimiter;
    /// let limiter = RateLimiter::new("polygon", 300); // 5 req/sec
    /// assert_eq!(limiter.capacity(), 5);
    /// ```
    pub fn new(name: impl Into<String>, requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1) as f64;
        let capacity = (rpm / 60.0).ceil().max(1.0);

        Self {
            capacity,
            refill_per_sec: rpm / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            name: name.into(),
        }
    }

    /// Acquire a token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.take_or_wait() {
                None => return,
                Some(wait) => wait,
            };

            debug!(
                limiter = %self.name,
                wait_ms = wait.as_millis() as u64,
                "Rate limited, waiting for token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Try to acquire a token without waiting.
    pub fn try_acquire(&self) -> bool {
        self.take_or_wait().is_none()
    }

    /// Take a token, or report how long until the next one.
    fn take_or_wait(&self) -> Option<Duration> {
        let mut bucket = match self.bucket.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let missing = 1.0 - bucket.tokens;
            let secs = missing / self.refill_per_sec;
            Some(Duration::from_secs_f64(secs).clamp(
                Duration::from_millis(1),
                Duration::from_secs(1),
            ))
        }
    }

    /// Currently available tokens.
    pub fn available_tokens(&self) -> f64 {
        let bucket = match self.bucket.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity)
    }

    /// Bucket size.
    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }
}

/// Shared rate limiter.
pub type SharedRateLimiter = Arc<RateLimiter>;

/// Create a shared rate limiter.
pub fn shared_limiter(name: impl Into<String>, requests_per_minute: u32) -> SharedRateLimiter {
    Arc::new(RateLimiter::new(name, requests_per_minute))
}
