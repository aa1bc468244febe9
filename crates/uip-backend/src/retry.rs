use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::BackendError;

pub const BASE_BACKOFF_MS: u64 = 100;

pub fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

/// Delay before retry number `attempt + 1`: 100ms, 200ms, 400ms, ...
pub fn next_backoff_ms(attempt: usize) -> u64 {
    let shift = attempt.min(10);
    BASE_BACKOFF_MS.saturating_mul(1_u64 << shift)
}

pub fn is_retryable_http_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Retry budget for an outbound send. `max_retries` counts retries after
/// the first attempt.
pub struct RetryPolicy {
    pub max_retries: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize) -> Self {
        Self { max_retries }
    }

    pub fn total_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }
}

/// Sleeps for `delay_ms` unless `cancel` fires first.
pub async fn sleep_or_cancel(delay_ms: u64, cancel: &CancellationToken) -> Result<(), BackendError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(BackendError::Cancelled),
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => Ok(()),
    }
}

/// Runs `operation` until it succeeds, fails terminally, or the policy is
/// exhausted. The closure receives the zero-based attempt index.
pub async fn send_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    operation_name: &'static str,
    mut operation: F,
) -> Result<T, BackendError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let total_attempts = policy.total_attempts();
    let mut attempt = 0_usize;
    loop {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            result = operation(attempt) => result,
        };
        let error = match result {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(operation = operation_name, attempts = attempt + 1, "send succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if error.is_abort() => return Err(error),
            Err(error) => error,
        };

        let attempts = attempt + 1;
        let retryable = error.is_retryable();
        if !retryable || attempts >= total_attempts {
            tracing::warn!(
                operation = operation_name,
                attempts,
                retryable,
                error = %error,
                "send failed"
            );
            return Err(BackendError::SendFailed {
                attempts,
                last: error.to_string(),
            });
        }

        let backoff_ms = next_backoff_ms(attempt);
        tracing::debug!(
            operation = operation_name,
            attempt = attempts,
            backoff_ms,
            error = %error,
            "retrying send"
        );
        sleep_or_cancel(backoff_ms, cancel).await?;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use tokio_util::sync::CancellationToken;

    use super::{next_backoff_ms, send_with_retry, should_retry_status, RetryPolicy};
    use crate::BackendError;

    fn unavailable() -> BackendError {
        BackendError::HttpStatus {
            status: 503,
            body: "unavailable".to_string(),
        }
    }

    #[test]
    fn unit_retry_status_selection_is_correct() {
        assert!(should_retry_status(429));
        assert!(should_retry_status(503));
        assert!(should_retry_status(408));
        assert!(!should_retry_status(400));
        assert!(!should_retry_status(409));
    }

    #[test]
    fn unit_backoff_doubles_from_one_hundred_ms() {
        assert_eq!(next_backoff_ms(0), 100);
        assert_eq!(next_backoff_ms(1), 200);
        assert_eq!(next_backoff_ms(2), 400);
        assert_eq!(next_backoff_ms(64), next_backoff_ms(10));
    }

    #[tokio::test]
    async fn functional_fails_twice_then_succeeds_within_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();
        let result = send_with_retry(RetryPolicy::new(3), &cancel, "test", |_| {
            let counter = counter.clone();
            async move {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                if call < 2 {
                    Err(unavailable())
                } else {
                    Ok("accepted")
                }
            }
        })
        .await;
        assert_eq!(result.expect("third attempt succeeds"), "accepted");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn functional_exhausted_retries_yield_send_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();
        let result: Result<(), BackendError> =
            send_with_retry(RetryPolicy::new(2), &cancel, "test", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(unavailable())
                }
            })
            .await;
        match result {
            Err(BackendError::SendFailed { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unit_terminal_status_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let counter = calls.clone();
        let result: Result<(), BackendError> =
            send_with_retry(RetryPolicy::new(3), &cancel, "test", |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::HttpStatus {
                        status: 400,
                        body: "bad".to_string(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(BackendError::SendFailed { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn regression_cancellation_aborts_backoff_immediately() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let result: Result<(), BackendError> =
            send_with_retry(RetryPolicy::new(10), &cancel, "test", |_| async {
                Err(unavailable())
            })
            .await;
        assert!(matches!(result, Err(BackendError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
