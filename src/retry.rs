//! Retry with exponential backoff for outbound calls
//!
//! Transient CRM and HR failures are retried a bounded number of times;
//! permanent failures surface immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Backoff policy for retryable outbound calls
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Multiplier applied to the delay after each attempt
    pub factor: u32,
    /// Upper bound on any single delay
    pub cap: Duration,
    /// Total attempts, including the first
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2,
            cap: Duration::from_secs(4),
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// Delay to sleep after the given zero-based attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.factor.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Run `op` until it succeeds, the error is not retryable, or attempts run out.
///
/// `is_retryable` decides which errors are worth another attempt; the final
/// error is returned unchanged either way.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: BackoffPolicy,
    label: &str,
    is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < policy.max_attempts && is_retryable(&err) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    label,
                    attempt + 1,
                    policy.max_attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
