use std::future::Future;
use std::time::Duration;

use crate::error::PortalResult;

/// Exponential backoff for `TransientStore` failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Re-runs `operation` while it fails with a retryable error.
///
/// Each attempt is a full call, so operations that re-validate their
/// preconditions (booking re-checks availability) stay safe to repeat.
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, mut operation: F) -> PortalResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PortalResult<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            outcome => return outcome,
        }
    }
}
