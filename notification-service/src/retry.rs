//! Exponential backoff with jitter for collaborator calls.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::DispatchError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the wait after the given failed attempt (0-based):
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis(delay_ms.min(max_ms) as u64)
    }

    /// The actual wait: somewhere between half and all of the upper bound.
    fn jittered(&self, attempt: u32) -> Duration {
        let ceiling = self.delay_for_attempt(attempt);
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        ceiling.mul_f64(factor)
    }
}

/// Retries `operation` while it fails transiently and attempts remain.
/// Permanent failures return immediately.
pub async fn retry_with_backoff<F, Fut, T>(policy: RetryPolicy, mut operation: F) -> Result<T, DispatchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DispatchError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt + 1 >= policy.max_attempts.max(1) => {
                tracing::error!(attempt, error = %err, "Operation failed after max attempts");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.jittered(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying..."
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
