//! Retry policy with exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ProviderError;

/// How an adapter retries transient provider failures.
///
/// The delay before retry `n` (1-based) is `base_delay_ms * 2^(n-1)`, capped
/// at `max_delay_ms`. With `jitter`, the delay is scaled by a random factor in
/// `[0.5, 1.0)`. A rate-limit `retry_after` from the server is honoured when
/// it is longer than the computed delay.
///
/// # Example
///
/// ```rust,ignore
/// use cite_rag::RetryPolicy;
///
/// // Production-style policy.
/// let policy = RetryPolicy::default();
/// // Tests: retry up to three times without sleeping.
/// let fast = RetryPolicy::immediate(3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Randomise delays to avoid synchronised retries.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 4, base_delay_ms: 500, max_delay_ms: 16_000, jitter: true }
    }
}

/// The last error of an exhausted or aborted retry loop.
#[derive(Debug, Clone)]
pub struct RetryFailure {
    /// The error returned by the final attempt.
    pub error: ProviderError,
    /// Number of attempts made.
    pub attempts: u32,
}

impl RetryPolicy {
    /// A single attempt, never retried.
    pub fn none() -> Self {
        Self { max_attempts: 1, base_delay_ms: 0, max_delay_ms: 0, jitter: false }
    }

    /// Up to `max_attempts` attempts with zero delay between them.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, base_delay_ms: 0, max_delay_ms: 0, jitter: false }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (1-based), ignoring server hints.
    pub fn backoff(&self, retry: u32) -> Duration {
        if self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = retry.saturating_sub(1).min(20);
        let raw = self.base_delay_ms.saturating_mul(1u64 << exponent).min(self.max_delay_ms);
        let millis = if self.jitter {
            let factor = 0.5 + rand::random::<f64>() * 0.5;
            (raw as f64 * factor) as u64
        } else {
            raw
        };
        Duration::from_millis(millis)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt limit is reached. `op` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns a [`RetryFailure`] with the last error and the attempt count.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let mut wait = self.backoff(attempt);
                    if let Some(hint) = error.retry_after() {
                        wait = wait.max(hint);
                    }
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %error,
                        "retrying after transient error"
                    );
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                    attempt += 1;
                }
                Err(error) => {
                    debug!(operation = label, attempt, error = %error, "giving up");
                    return Err(RetryFailure { error, attempts: attempt });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy =
            RetryPolicy { max_attempts: 5, base_delay_ms: 100, max_delay_ms: 350, jitter: false };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(30), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let policy =
            RetryPolicy { max_attempts: 3, base_delay_ms: 1000, max_delay_ms: 1000, jitter: true };
        for _ in 0..50 {
            let delay = policy.backoff(1);
            assert!(delay >= Duration::from_millis(500) && delay <= Duration::from_millis(1000));
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = RetryPolicy::immediate(3)
            .run("test", move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Transport("reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_at_attempt_limit() {
        let failure = RetryPolicy::immediate(2)
            .run("test", |_| async { Err::<(), _>(ProviderError::Timeout("slow".into())) })
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.error, ProviderError::Timeout("slow".into()));
    }

    #[tokio::test]
    async fn does_not_retry_rejections() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let failure = RetryPolicy::immediate(5)
            .run("test", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::Rejected("bad key".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn honours_rate_limit_hint() {
        let start = tokio::time::Instant::now();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = RetryPolicy::immediate(2)
            .run("test", move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ProviderError::RateLimited {
                        message: "slow down".into(),
                        retry_after: Some(Duration::from_secs(2)),
                    })
                } else {
                    Ok(())
                }
            })
            .await;
        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
