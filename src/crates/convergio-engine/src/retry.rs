//! Retry policy with exponential backoff
//!
//! Delays double from a base and cap at 60 seconds:
//! `min(60, base * 2^(attempt-1))` for the attempt-th retry. Only errors
//! whose taxonomy kind is retryable go through the schedule; everything
//! else short-circuits on the first failure.

use crate::error::{EngineError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Hard ceiling on any single backoff delay
pub const MAX_DELAY_SECS: u64 = 60;

/// Retry configuration
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry, in seconds
    pub base_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_secs: u64) -> Self {
        Self {
            max_retries,
            base_delay_secs,
        }
    }

    /// Delay before retry number `attempt` (1-indexed)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let secs = self.base_delay_secs.saturating_mul(factor).min(MAX_DELAY_SECS);
        Duration::from_secs(secs)
    }

    /// The full delay schedule, one entry per possible retry
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_retries).map(|a| self.delay(a)).collect()
    }
}

/// Run an operation under a retry policy
///
/// Non-retryable errors and exhausted retries both surface the last error.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(category = "workflow", label, attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(
                    category = "workflow",
                    label,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_secs = delay.as_secs(),
                    kind = %err.kind(),
                    error = %err,
                    "retryable failure, backing off"
                );
                sleep(delay).await;
            }
            Err(err) => {
                warn!(
                    category = "workflow",
                    label,
                    attempt,
                    kind = %err.kind(),
                    error = %err,
                    "giving up"
                );
                return Err(err);
            }
        }
    }
}
