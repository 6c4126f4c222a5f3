//! Bounded exponential backoff for calls to rate-limited services.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(8, 2_000, 60_000)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. Exhausting the budget on rate limits surfaces as
/// `Error::Service`.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(what, attempt, max_attempts = policy.max_attempts, delay_ms = delay.as_millis() as u64, error = %e, "retrying after rate limit");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(Error::RateLimited(msg)) => {
                return Err(Error::Service(format!(
                    "{what}: rate limit retries exhausted after {attempt} attempts ({msg})"
                )))
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, 1, 4)
    }

    #[test]
    fn delay_doubles_and_caps() {
        let p = RetryPolicy::new(8, 2_000, 60_000);
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(8));
        assert_eq!(p.delay_for(8), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn recovers_after_transient_rate_limit() {
        let calls = AtomicU32::new(0);
        let out = with_backoff(&fast(5), "embed", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::RateLimited("429".into()))
            } else {
                Ok(42)
            }
        })
        .await
        .expect("third attempt succeeds");
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_becomes_service_error() {
        let calls = AtomicU32::new(0);
        let err = with_backoff(&fast(3), "embed", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::RateLimited("429".into()))
        })
        .await
        .expect_err("budget exhausted");
        assert!(matches!(err, Error::Service(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_backoff(&fast(5), "generate", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::Service("500".into()))
        })
        .await
        .expect_err("fatal");
        assert!(matches!(err, Error::Service(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
