//! Token-bucket rate limiter guarding outbound calls to the upstream
//! pricing oracle. The oracle is explicitly "expensive, rate-limited"
//! (spec §1) — this sits in front of [`crate::oracle_client::PricingOracleClient`]
//! so the single fetcher call a cache leader makes never bursts past what
//! the oracle tolerates, independent of how many leaders are coalescing
//! requests across different keys at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct OracleRateLimitConfig {
    pub requests_per_minute: f64,
    pub burst_size: f64,
}

impl Default for OracleRateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60.0,
            burst_size: 5.0,
        }
    }
}

#[derive(Debug)]
struct TokenBucketState {
    tokens: f64,
    capacity: f64,
    refill_rate_per_second: f64,
    last_refill: Instant,
}

impl TokenBucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate_per_second).min(self.capacity);
        self.last_refill = now;
    }
}

/// Cheap to clone; shares one token bucket across every call site that
/// holds a reference to the same oracle.
#[derive(Clone)]
pub struct OracleRateLimiter {
    state: Arc<Mutex<TokenBucketState>>,
    throttled: Arc<AtomicU64>,
}

impl OracleRateLimiter {
    pub fn new(config: OracleRateLimitConfig) -> Self {
        let capacity = config.burst_size.max(1.0);
        let refill_rate_per_second = (config.requests_per_minute / 60.0).max(0.01);
        Self {
            state: Arc::new(Mutex::new(TokenBucketState {
                tokens: capacity,
                capacity,
                refill_rate_per_second,
                last_refill: Instant::now(),
            })),
            throttled: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Waits until a token is available, then consumes it. Called once
    /// per upstream call immediately before the HTTP request goes out.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                state.refill();
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let seconds = (1.0 - state.tokens) / state.refill_rate_per_second;
                    Some(Duration::from_secs_f64(seconds.max(0.001)))
                }
            };

            match wait {
                None => return,
                Some(wait) => {
                    self.throttled.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    pub fn throttled_count(&self) -> u64 {
        self.throttled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_up_to_capacity_does_not_wait() {
        let limiter = OracleRateLimiter::new(OracleRateLimitConfig {
            requests_per_minute: 60.0,
            burst_size: 3.0,
        });

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(limiter.throttled_count(), 0);
    }

    #[tokio::test]
    async fn exceeding_capacity_forces_a_wait() {
        let limiter = OracleRateLimiter::new(OracleRateLimitConfig {
            requests_per_minute: 600.0,
            burst_size: 1.0,
        });

        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(limiter.throttled_count(), 1);
    }
}
