use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;

/// Token-bucket rate limiter for a single host (C1). `acquire()` blocks
/// until a token is available; `adjust()` is invoked by the Retry Engine on
/// HTTP 429 / server 5xx to halve the effective rate (floor 10% of the
/// configured baseline) and recovers it by +20% after a 20-success streak,
/// per §4.1.
pub struct RateLimiter {
    baseline_rate: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    capacity: f64,
    effective_rate: f64,
    last_refill: Instant,
    success_streak: u32,
}

const SUCCESS_STREAK_THRESHOLD: u32 = 20;
const FAILURE_MULTIPLIER: f64 = 0.5;
const RECOVERY_MULTIPLIER: f64 = 1.2;
const RATE_FLOOR_FRACTION: f64 = 0.1;

impl RateLimiter {
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        Self {
            baseline_rate: rate_per_second,
            state: Mutex::new(BucketState {
                tokens: burst.max(1) as f64,
                capacity: burst.max(1) as f64,
                effective_rate: rate_per_second,
                last_refill: Instant::now(),
                success_streak: 0,
            }),
        }
    }

    /// Block until a token is available, then consume one.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                state.refill();
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / state.effective_rate.max(f64::EPSILON))
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Record an outcome. On failure the rate is halved (floored at 10% of
    /// baseline); on a streak of >= 20 successes the rate recovers by 20%
    /// up to the configured baseline.
    pub async fn adjust(&self, success: bool) {
        let mut state = self.state.lock().await;
        state.refill();
        if success {
            state.success_streak += 1;
            if state.success_streak >= SUCCESS_STREAK_THRESHOLD {
                state.effective_rate =
                    (state.effective_rate * RECOVERY_MULTIPLIER).min(self.baseline_rate);
                state.success_streak = 0;
            }
        } else {
            state.success_streak = 0;
            let floor = self.baseline_rate * RATE_FLOOR_FRACTION;
            state.effective_rate = (state.effective_rate * FAILURE_MULTIPLIER).max(floor);
        }
    }

    pub async fn effective_rate(&self) -> f64 {
        self.state.lock().await.effective_rate
    }
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.effective_rate).min(self.capacity);
    }
}

/// Process-global registry of per-host rate limiters (§4.1: "the limiter is
/// process-global for a given host").
#[derive(Clone)]
pub struct RateLimiterRegistry {
    baseline_rate: f64,
    burst: u32,
    limiters: Arc<DashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        Self {
            baseline_rate: rate_per_second,
            burst,
            limiters: Arc::new(DashMap::new()),
        }
    }

    pub fn for_host(&self, host: &str) -> Arc<RateLimiter> {
        self.limiters
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(self.baseline_rate, self.burst)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_tokens_are_immediately_available() {
        let limiter = RateLimiter::new(1.0, 3);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn adjust_halves_rate_on_failure_and_floors_at_ten_percent() {
        let limiter = RateLimiter::new(10.0, 1);
        for _ in 0..20 {
            limiter.adjust(false).await;
        }
        let rate = limiter.effective_rate().await;
        assert!(rate >= 1.0 - 1e-9);
        assert!(rate < 1.5);
    }

    #[tokio::test]
    async fn adjust_recovers_after_success_streak() {
        let limiter = RateLimiter::new(10.0, 1);
        limiter.adjust(false).await;
        let degraded = limiter.effective_rate().await;
        for _ in 0..20 {
            limiter.adjust(true).await;
        }
        let recovered = limiter.effective_rate().await;
        assert!(recovered > degraded);
        assert!(recovered <= 10.0 + 1e-9);
    }

    #[test]
    fn registry_returns_same_limiter_for_host() {
        let registry = RateLimiterRegistry::new(5.0, 2);
        let a = registry.for_host("example.com");
        let b = registry.for_host("example.com");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
