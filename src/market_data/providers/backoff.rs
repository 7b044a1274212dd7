use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::market_data::{MarketDataError, RetryClass};

/// Retry budget for one logical upstream call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub total_deadline: Duration,
}

impl RetryPolicy {
    /// Exponential delay for the given attempt with ±50% jitter so parallel
    /// workers don't re-hit a rate limit in lockstep.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * f64::powi(2.0, attempt as i32);
        let jitter = 1.0 + (rand::random::<f64>() - 0.5);
        Duration::from_secs_f64(exp * jitter)
    }
}

/// Runs `op` until it succeeds, fails fatally, or the retry/deadline budget
/// is exhausted. Only `RetryClass::Retryable` errors are retried; exhaustion
/// returns the last error. Cancellation is honored before every attempt and
/// during backoff sleeps.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    provider: &str,
    cancel: &CancellationToken,
    op: F,
) -> Result<T, MarketDataError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, MarketDataError>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(MarketDataError::Canceled);
        }

        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if error.retry_class() != RetryClass::Retryable {
            return Err(error);
        }
        if attempt >= policy.max_retries {
            warn!("{}: retries exhausted after {} attempts", provider, attempt + 1);
            return Err(error);
        }

        let delay = policy.delay_for_attempt(attempt);
        if started.elapsed() + delay > policy.total_deadline {
            warn!("{}: total retry deadline exceeded", provider);
            return Err(error);
        }

        debug!(
            "{}: transient failure ({}), retrying in {:.1}s",
            provider,
            error,
            delay.as_secs_f64()
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(MarketDataError::Canceled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
            total_deadline: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = retry_with_backoff(quick_policy(), "TEST", &cancel, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(MarketDataError::RateLimited {
                        provider: "TEST".to_string(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), _> = retry_with_backoff(quick_policy(), "TEST", &cancel, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(MarketDataError::UpstreamStatus {
                    provider: "TEST".to_string(),
                    status: 403,
                    message: "forbidden".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> = retry_with_backoff(quick_policy(), "TEST", &cancel, || async {
            Err(MarketDataError::Timeout {
                provider: "TEST".to_string(),
            })
        })
        .await;
        assert!(matches!(result, Err(MarketDataError::Timeout { .. })));
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> =
            retry_with_backoff(quick_policy(), "TEST", &cancel, || async { Ok(()) }).await;
        assert!(matches!(result, Err(MarketDataError::Canceled)));
    }
}
