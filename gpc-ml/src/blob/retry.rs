//! Bounded retry with exponential backoff and jitter

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::models::parameters::RetryParameters;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_parameters(params: &RetryParameters) -> Self {
        Self {
            max_attempts: params.max_attempts.max(1),
            base_delay: Duration::from_millis(params.base_delay_ms),
            max_delay: Duration::from_millis(params.max_delay_ms),
        }
    }

    /// Upper bound of the wait after failed attempt `attempt` (1-based):
    /// `base × 2^(attempt-1)`, capped at `max_delay`
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Jittered wait in `[ceiling / 2, ceiling]`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms < 2 {
            return ceiling;
        }
        let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
        Duration::from_millis(jittered)
    }
}

/// Retry `operation` while `is_retryable` accepts the error and attempts
/// remain. Non-retryable errors and the final error are returned as-is.
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < policy.max_attempts && is_retryable(&err) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
