//! Token-bucket rate limiter protecting the upstream HTTP API.
//!
//! Refill is continuous: `tokens = min(burst, tokens + elapsed * rate)`.
//! Every outbound upstream request acquires one token first; `acquire`
//! blocks until a token is available.

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

pub struct RateLimiter {
    rate_per_sec: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// A bucket that starts full (`burst` tokens).
    pub fn new(rate_per_sec: f64, burst: f64) -> Self {
        assert!(rate_per_sec > 0.0, "rate must be positive");
        assert!(burst >= 1.0, "burst must admit at least one token");
        Self {
            rate_per_sec,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Consume one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / self.rate_per_sec)
            };
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_admits_immediately() {
        let limiter = RateLimiter::new(10.0, 20.0);
        let start = Instant::now();
        for _ in 0..20 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn drained_bucket_paces_at_rate() {
        let limiter = RateLimiter::new(10.0, 1.0);
        limiter.acquire().await; // drain the single burst token

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        // 5 tokens at 10/s = 500ms of refill
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(490), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(600), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_refill_caps_at_burst() {
        let limiter = RateLimiter::new(10.0, 5.0);
        for _ in 0..5 {
            limiter.acquire().await;
        }
        // A long idle period must not accumulate more than `burst` tokens.
        sleep(Duration::from_secs(60)).await;

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
