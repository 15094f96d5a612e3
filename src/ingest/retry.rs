// src/ingest/retry.rs
//! Bounded retry with exponential backoff for content-source calls.

use std::future::Future;
use std::time::Duration;

use backoff::{backoff::Backoff, exponential::ExponentialBackoff, SystemClock};
use metrics::counter;
use tracing::{error, warn};

use crate::config::pipeline::RetryCfg;
use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_cfg(&RetryCfg::default())
    }
}

impl RetryPolicy {
    pub fn from_cfg(cfg: &RetryCfg) -> Self {
        Self {
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            max_attempts: cfg.max_attempts.max(1),
        }
    }

    /// Doubling backoff without jitter, capped at `max_delay`.
    fn backoff(&self) -> ExponentialBackoff<SystemClock> {
        let mut b: ExponentialBackoff<SystemClock> = ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        };
        b.reset();
        b
    }

    /// Delays slept between consecutive attempts (`max_attempts - 1` entries).
    pub fn delays(&self) -> Vec<Duration> {
        let mut b = self.backoff();
        (1..self.max_attempts)
            .map(|_| b.next_backoff().unwrap_or(self.max_delay))
            .collect()
    }
}

/// Run `op` until it succeeds, fails permanently, or `max_attempts` is spent.
///
/// Permanent errors are returned unchanged on first sight. Running out of
/// attempts yields `FetchError::Exhausted` wrapping the last error.
pub async fn with_retry<T, F, Fut>(
    op_name: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut backoff = policy.backoff();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                if attempt >= policy.max_attempts {
                    error!(operation = op_name, attempts = attempt, error = %e, "retries exhausted");
                    counter!("feed_fetch_errors_total").increment(1);
                    return Err(FetchError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                let delay = backoff.next_backoff().unwrap_or(policy.max_delay);
                warn!(operation = op_name, attempt, ?delay, error = %e, "retrying");
                counter!("feed_retries_total").increment(1);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            max_attempts: attempts,
        }
    }

    #[test]
    fn delays_double_and_cap() {
        let d = policy(5).delays();
        assert_eq!(
            d,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(350),
                Duration::from_millis(350),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success() {
        let calls = AtomicU32::new(0);
        let out = with_retry("test", &policy(4), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(FetchError::Transient("reset".into()))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_retry("test", &policy(4), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FetchError::NotFound("r/nope".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_wraps_last_error() {
        let calls = AtomicU32::new(0);
        let err = with_retry("test", &policy(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(FetchError::RateLimited)
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, FetchError::RateLimited));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }
}
