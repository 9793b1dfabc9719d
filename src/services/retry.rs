use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{AppError, AppResult};
use crate::services::errors;

/// Bounds for the retry loop around a single provider call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Full-jitter exponential backoff: a uniform draw from
    /// `0..min(base * 2^attempt, cap)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        if exp.is_zero() {
            return exp;
        }
        let jittered = rand::thread_rng().gen_range(0..=exp.as_millis() as u64);
        Duration::from_millis(jittered)
    }
}

/// Run `operation` with bounded retries.
///
/// Each failure is classified first; non-retryable kinds propagate
/// immediately without burning the remaining attempts. The final error after
/// exhaustion is returned unchanged so callers can still classify it.
/// `on_retry` fires with (attempt number, error) before each backoff sleep.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    mut operation: F,
    mut on_retry: impl FnMut(u32, &AppError),
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;

                let kind = errors::classify(&err);
                if !kind.is_retryable() || attempt >= policy.max_attempts {
                    return Err(err);
                }

                on_retry(attempt, &err);
                tokio::time::sleep(policy.backoff_delay(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn succeeds_without_retrying() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            fast_policy(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, AppError>(42) }
            },
            |_, _| {},
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_exhaust_all_attempts() {
        let calls = AtomicU32::new(0);
        let retries = AtomicU32::new(0);

        let result: AppResult<()> = retry_with_backoff(
            fast_policy(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::provider(Some(131016), "service overloaded")) }
            },
            |_, _| {
                retries.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(retries.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_errors_short_circuit() {
        let calls = AtomicU32::new(0);

        let result: AppResult<()> = retry_with_backoff(
            fast_policy(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::provider(Some(131026), "undeliverable")) }
            },
            |_, _| {},
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn final_error_is_propagated_unchanged() {
        let result: AppResult<()> = retry_with_backoff(
            RetryPolicy {
                max_attempts: 2,
                ..fast_policy()
            },
            || async { Err(AppError::provider(Some(130429), "throttled")) },
            |_, _| {},
        )
        .await;

        match result {
            Err(AppError::Provider { code, .. }) => assert_eq!(code, Some(130429)),
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[test]
    fn backoff_stays_within_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
        };
        for attempt in 0..10 {
            assert!(policy.backoff_delay(attempt) <= Duration::from_millis(250));
        }
    }
}
