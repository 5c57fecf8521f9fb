//! Token-bucket limiting for outbound search requests, shared across all
//! download workers. The adaptive variant backs off when the remote side
//! answers 429.

use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::Mutex;

struct Bucket {
    tokens: f64,
    last_update: Instant,
    /// Allowed calls per period.
    calls: f64,
    period: f64,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * (self.calls / self.period)).min(self.calls);
        self.last_update = now;
    }

    /// Seconds until the next whole token, assuming no refill happens.
    fn wait_for_next_token(&self) -> f64 {
        (1.0 - self.tokens) * (self.period / self.calls)
    }
}

pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(calls: u32, period: Duration) -> Self {
        let calls = f64::from(calls.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: calls,
                last_update: Instant::now(),
                calls,
                period: period.as_secs_f64().max(f64::EPSILON),
            }),
        }
    }

    /// Takes a token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                bucket.refill();
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                bucket.wait_for_next_token()
            };
            debug!("Rate limit reached, waiting {:.2}s", wait);
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    /// Non-blocking variant: takes a token if one is available.
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        bucket.refill();
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    async fn reconfigure(&self, calls: u32) {
        let calls = f64::from(calls.max(1));
        let mut bucket = self.bucket.lock().await;
        bucket.refill();
        bucket.calls = calls;
        bucket.tokens = bucket.tokens.min(calls);
    }
}

/// Rate limiter that adapts to the remote side: allowance shrinks by half
/// on 429 responses and creeps back up one call at a time on success.
pub struct AdaptiveRateLimiter {
    limiter: RateLimiter,
    state: Mutex<AdaptiveState>,
    min_calls: u32,
    max_calls: u32,
    period: Duration,
}

struct AdaptiveState {
    current_calls: u32,
}

impl AdaptiveRateLimiter {
    pub fn new(initial_calls: u32, period: Duration, min_calls: u32, max_calls: u32) -> Self {
        Self {
            limiter: RateLimiter::new(initial_calls, period),
            state: Mutex::new(AdaptiveState {
                current_calls: initial_calls,
            }),
            min_calls: min_calls.max(1),
            max_calls,
            period,
        }
    }

    pub async fn acquire(&self) {
        self.limiter.acquire().await;
    }

    pub async fn on_success(&self) {
        let mut state = self.state.lock().await;
        if state.current_calls < self.max_calls {
            state.current_calls += 1;
            self.limiter.reconfigure(state.current_calls).await;
            debug!(
                "Increased rate limit to {} calls per {:?}",
                state.current_calls, self.period
            );
        }
    }

    pub async fn on_rate_limit_error(&self) {
        let mut state = self.state.lock().await;
        if state.current_calls > self.min_calls {
            state.current_calls = (state.current_calls / 2).max(self.min_calls);
            self.limiter.reconfigure(state.current_calls).await;
            warn!(
                "Decreased rate limit to {} calls per {:?} after 429",
                state.current_calls, self.period
            );
        }
    }

    pub async fn current_calls(&self) -> u32 {
        self.state.lock().await.current_calls
    }
}
