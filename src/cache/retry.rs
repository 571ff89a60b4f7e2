//! Timeout and retry wrapper for single store round-trips.

use std::{future::Future, time::Duration};

use tracing::{debug, warn};

use super::error::{CacheError, CacheResult};
use crate::config::RetryConfig;

/// Whether repeating a command can change its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Reads, unconditional writes, deletes: safe to repeat.
    Idempotent,
    /// Counters, pushes, pops, conditional writes: run at most once.
    NonIdempotent,
}

/// Run `call` with a per-attempt timeout, retrying transient failures of
/// idempotent commands with exponential backoff.
///
/// Returns the first success, the first non-transient error, or the last
/// error once attempts are exhausted.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    idempotency: Idempotency,
    timeout: Duration,
    operation: &'static str,
    key: &str,
    call: F,
) -> CacheResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = CacheResult<T>>,
{
    let max_attempts = match idempotency {
        Idempotency::Idempotent => config.max_retries + 1,
        Idempotency::NonIdempotent => 1,
    };

    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(timeout.as_millis() as u64)),
        };

        match result {
            Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation,
                    key,
                    error = %error,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Transient store error, will retry after delay"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation,
                        key,
                        attempt = attempt + 1,
                        "Store operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            jitter: 0.0,
            ..Default::default()
        }
    }

    /// Fails with `error` for the first `failures` calls, then succeeds.
    async fn flaky(calls: &AtomicU32, failures: u32, error: fn() -> CacheError) -> CacheResult<u32> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures { Err(error()) } else { Ok(n) }
    }

    #[tokio::test]
    async fn test_idempotent_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            &fast_retry(2),
            Idempotency::Idempotent,
            Duration::from_secs(1),
            "get",
            "k",
            || flaky(&calls, 2, || CacheError::Unavailable),
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            &fast_retry(2),
            Idempotency::Idempotent,
            Duration::from_secs(1),
            "get",
            "k",
            || flaky(&calls, 10, || CacheError::Unavailable),
        )
        .await;

        assert!(matches!(result, Err(CacheError::Unavailable)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_idempotent_runs_once() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            &fast_retry(5),
            Idempotency::NonIdempotent,
            Duration::from_secs(1),
            "incr",
            "k",
            || flaky(&calls, 1, || CacheError::Unavailable),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            &fast_retry(5),
            Idempotency::Idempotent,
            Duration::from_secs(1),
            "get",
            "k",
            || flaky(&calls, 1, || CacheError::WrongType("k".into())),
        )
        .await;

        assert!(matches!(result, Err(CacheError::WrongType(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let result: CacheResult<()> = with_retry(
            &RetryConfig::disabled(),
            Idempotency::Idempotent,
            Duration::from_millis(20),
            "get",
            "k",
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        assert!(matches!(result, Err(CacheError::Timeout(20))));
    }
}
