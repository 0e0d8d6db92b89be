//! Bounded retry with exponential backoff for remote client calls.
//!
//! Only the adapters retry; pipeline stages see a single call that either
//! succeeds or fails after the policy is exhausted.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryPolicy;
use crate::error::ClientError;

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff_for(&self, attempt: usize, retry_after: Option<Duration>) -> Duration {
        let cap = Duration::from_millis(self.max_backoff_ms);
        if let Some(hint) = retry_after {
            return hint.min(cap);
        }
        let exp = attempt.saturating_sub(1).min(16) as u32;
        let delay = self.initial_backoff_ms.saturating_mul(2u64.pow(exp));
        Duration::from_millis(delay).min(cap)
    }

    /// No retries at all; used by tests and one-shot tools.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }
}

/// Run `call` until it succeeds, fails permanently, or attempts run out.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff_for(attempt, e.retry_after());
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(operation, attempts = attempt, error = %e, "Retries exhausted");
                }
                return Err(e);
            }
        }
    }
}
