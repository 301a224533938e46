use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::storage::backend::StorageError;

/// Default number of attempts (first call included)
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default backoff unit; retry `n` waits `2^n` units
const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default upper bound for random jitter
const DEFAULT_MAX_JITTER_MS: u64 = 1000;

/// Whether a failed attempt is worth another try
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Transient failure, back off and try again
    Retry,
    /// Permanent failure, surface it immediately
    NoRetry,
}

/// Exponential backoff settings for idempotent bucket mutations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_jitter: Duration::from_millis(DEFAULT_MAX_JITTER_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_jitter: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_jitter,
        }
    }

    /// Delay after the `retry`-th failed attempt (1-based).
    /// Jitter only starts with the second retry.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(2u32.saturating_pow(retry));
        if retry >= 2 {
            exponential + random_jitter(self.max_jitter)
        } else {
            exponential
        }
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the policy's
/// attempts are used up. The last error is returned unchanged.
pub async fn with_backoff<T, F, Fut>(operation: &str, policy: &RetryPolicy, mut call: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt = 1;

    loop {
        let err = match call().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation, attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        match err.retry_decision() {
            RetryDecision::NoRetry => {
                debug!(operation = operation, attempt = attempt, error = %err, "Operation failed, not retryable");
                return Err(err);
            }
            RetryDecision::Retry if attempt >= policy.max_attempts => {
                error!(
                    operation = operation,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "Operation failed permanently"
                );
                return Err(err);
            }
            RetryDecision::Retry => {
                let delay = policy.backoff(attempt);
                warn!(
                    operation = operation,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, will retry"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
