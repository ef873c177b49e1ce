//! Bounded retry for transient collaborator failures.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

const MAX_BACKOFF_MS: u64 = 30_000;

/// Fixed-attempt retry strategy.
///
/// The delay before retry `n` (zero-based) is `delay * backoff^n`, so a
/// `backoff` of 1.0 gives a constant delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
            backoff: 1.0,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            backoff: 1.0,
        }
    }

    /// A policy that tries once and never sleeps.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff.max(1.0).powi(retry as i32);
        self.delay
            .mul_f64(factor)
            .min(Duration::from_millis(MAX_BACKOFF_MS))
    }
}

/// Run `op` until it succeeds or the policy's attempts are exhausted.
///
/// Returns the last error when every attempt fails.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Exponential backoff for a loop that keeps failing: `base * 2^attempt`,
/// capped at 30 seconds.
pub fn backoff_duration(attempt: u32, base_delay_ms: u64) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}
