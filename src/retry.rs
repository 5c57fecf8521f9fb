//! Single retry-with-backoff abstraction used by every fallible network
//! operation in the crate; replaces per-module ad hoc retry loops.

use std::future::Future;
use std::time::Duration;

use log::{info, warn};

use crate::errors::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Clamped to at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Derives a policy from the configured retry count: `retry_attempts`
    /// extra tries on top of the initial one.
    pub fn from_attempts(retry_attempts: u32) -> Self {
        Self {
            max_attempts: retry_attempts + 1,
            ..Self::default()
        }
    }
}

/// Runs `op`, retrying with exponential backoff while the returned error
/// is retryable. Non-retryable errors and the final failure surface
/// unchanged; no sleep happens after the last attempt.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.base_delay;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            info!("Attempt {}/{} for {}", attempt, max_attempts, label);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !e.is_retryable() || attempt == max_attempts {
                    if attempt == max_attempts && e.is_retryable() {
                        warn!("All {} attempts failed for {}: {}", max_attempts, label, e);
                    }
                    return Err(e);
                }

                let sleep_for = delay.min(policy.max_delay);
                warn!(
                    "Attempt {}/{} failed for {}: {} (retrying in {:.1}s)",
                    attempt,
                    max_attempts,
                    label,
                    e,
                    sleep_for.as_secs_f64()
                );
                tokio::time::sleep(sleep_for).await;
                delay = delay.mul_f64(policy.multiplier);
            }
        }
    }

    unreachable!("retry loop always returns from the final attempt")
}
