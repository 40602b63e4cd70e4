//! Rate Limiter implementation using the token bucket algorithm
//!
//! Keeps the exchange gateway (§4.4) within the exchange's published rate
//! limits.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests allowed per interval
    pub max_requests_per_second: usize,
    /// Refill interval for tokens
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: 10,
            refill_interval: Duration::from_secs(1),
        }
    }
}

impl RateLimiterConfig {
    pub fn with_rate(mut self, requests_per_second: usize) -> Self {
        self.max_requests_per_second = requests_per_second;
        self
    }

    pub fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.refill_interval = interval;
        self
    }
}

/// Rate limiter using a token bucket.
///
/// # Example
///
/// ```
/// use deal_engine::common::{RateLimiter, RateLimiterConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let config = RateLimiterConfig::default().with_rate(5);
///     let limiter = RateLimiter::new(config);
///     limiter.acquire().await;
/// }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    max_permits: usize,
    last_refill: Arc<Mutex<Instant>>,
    refill_interval: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_requests_per_second)),
            max_permits: config.max_requests_per_second,
            last_refill: Arc::new(Mutex::new(Instant::now())),
            refill_interval: config.refill_interval,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RateLimiterConfig::default())
    }

    pub fn with_rate(requests_per_second: usize) -> Self {
        Self::new(RateLimiterConfig::default().with_rate(requests_per_second))
    }

    /// Refills if due, then waits for and consumes a permit.
    pub async fn acquire(&self) {
        self.try_refill().await;
        let permit = self
            .permits
            .acquire()
            .await
            .expect("semaphore should not be closed");
        permit.forget();
    }

    /// Non-blocking variant. Returns `false` if no permit is currently available.
    pub async fn try_acquire(&self) -> bool {
        self.try_refill().await;
        match self.permits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    async fn try_refill(&self) {
        let mut last_refill = self.last_refill.lock().await;
        let elapsed = last_refill.elapsed();

        if elapsed >= self.refill_interval {
            let intervals = (elapsed.as_millis() / self.refill_interval.as_millis()) as usize;
            let permits_to_add = intervals * self.max_permits;

            let current = self.permits.available_permits();
            let to_add = permits_to_add.min(self.max_permits.saturating_sub(current));

            if to_add > 0 {
                self.permits.add_permits(to_add);
            }

            *last_refill = Instant::now();
        }
    }
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            permits: Arc::clone(&self.permits),
            max_permits: self.max_permits,
            last_refill: Arc::clone(&self.last_refill),
            refill_interval: self.refill_interval,
        }
    }
}
