//! Bounded retries for GCP API calls
//!
//! Transient failures (rate limits, 5xx, dropped connections) are retried with
//! exponential backoff. Everything else is returned on the first attempt.

use crate::error::{FetchError, Result};
use crate::resource::{ErrorClass, ErrorClassifier};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry budget and backoff for API calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub base_wait_ms: u64,
    /// The wait before retry N is `base_wait * backoff_factor^N`.
    pub backoff_factor: f64,
    /// Upper bound for a single wait.
    pub max_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_wait_ms: 500,
            backoff_factor: 2.0,
            max_wait_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn wait_for(&self, retry: u32) -> Duration {
        let max = Duration::from_millis(self.max_wait_ms);
        let factor = self.backoff_factor.powi(retry.min(i32::MAX as u32) as i32);
        let secs = Duration::from_millis(self.base_wait_ms).as_secs_f64() * factor;
        // Waits that do not fit a Duration fall back to the cap
        Duration::try_from_secs_f64(secs).map_or(max, |wait| wait.min(max))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(FetchError::configuration(
                "retry.backoff_factor must be a non-negative number",
            ));
        }
        Ok(())
    }
}

/// Runs an operation until it succeeds, fails permanently, runs out of
/// retries or is cancelled.
#[derive(Debug, Clone)]
pub struct Retrier {
    config: RetryConfig,
    classifier: ErrorClassifier,
}

impl Retrier {
    pub fn new(config: RetryConfig, classifier: ErrorClassifier) -> Self {
        Self { config, classifier }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0u32;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = op() => result,
            };

            match result {
                Err(err)
                    if retry < self.config.max_retries
                        && self.classifier.classify(&err) == ErrorClass::Retryable =>
                {
                    let wait = self.config.wait_for(retry);
                    tracing::warn!("{} - retrying after {:?}", err, wait);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                    retry += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retrier(max_retries: u32) -> Retrier {
        Retrier::new(
            RetryConfig {
                max_retries,
                base_wait_ms: 0,
                backoff_factor: 0.0,
                max_wait_ms: 0,
            },
            ErrorClassifier::default(),
        )
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            base_wait_ms: 100,
            backoff_factor: 2.0,
            max_wait_ms: 1_000,
        };
        assert_eq!(config.wait_for(0), Duration::from_millis(100));
        assert_eq!(config.wait_for(1), Duration::from_millis(200));
        assert_eq!(config.wait_for(3), Duration::from_millis(800));
        assert_eq!(config.wait_for(4), Duration::from_millis(1_000));
        assert_eq!(config.wait_for(60), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_retries_transient_errors_up_to_budget() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<()> = retrier(3)
            .run(&cancel, || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable").into())
            })
            .await;

        assert!(matches!(result, Err(FetchError::Api(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<()> = retrier(3)
            .run(&cancel, || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::new(StatusCode::FORBIDDEN, "denied").into())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failure() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = retrier(3)
            .run(&cancel, || async {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ApiError::new(StatusCode::TOO_MANY_REQUESTS, "slow down").into())
                } else {
                    Ok(42)
                }
            })
            .await;

        let value = tokio_test::assert_ok!(result);
        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_calling() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = retrier(3)
            .run(&cancel, || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_during_backoff() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let retrier = Retrier::new(
            RetryConfig {
                max_retries: 3,
                base_wait_ms: 60_000,
                backoff_factor: 1.0,
                max_wait_ms: 60_000,
            },
            ErrorClassifier::default(),
        );

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result: Result<()> = tokio::time::timeout(
            Duration::from_secs(5),
            retrier.run(&cancel, || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable").into())
            }),
        )
        .await
        .expect("backoff was not interrupted");

        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_huge_backoff_is_capped_instead_of_overflowing() {
        let config = RetryConfig {
            max_retries: 3,
            base_wait_ms: u64::MAX,
            backoff_factor: 1e6,
            max_wait_ms: 30_000,
        };
        assert_eq!(config.wait_for(5), Duration::from_millis(30_000));

        let shrinking = RetryConfig {
            backoff_factor: 0.0,
            ..config
        };
        assert_eq!(shrinking.wait_for(2), Duration::ZERO);
    }
}
