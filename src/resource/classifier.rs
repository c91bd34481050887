//! Error classification
//!
//! Decides, per failure, whether a table fetch for a project is skipped,
//! retried or reported as failed. Decisions are based on HTTP status and the
//! structured reasons Google returns, never on message text.

use crate::error::{ApiError, FetchError};
use reqwest::StatusCode;
use std::fmt;
use std::sync::Arc;

/// Reasons that mean "this API is not available in this project"
pub const DEFAULT_IGNORED_REASONS: &[&str] =
    &["accessNotConfigured", "SERVICE_DISABLED", "BILLING_DISABLED"];

/// Google reports some quota errors as 403 with one of these reasons
const RATE_LIMIT_REASONS: &[&str] = &[
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "RATE_LIMIT_EXCEEDED",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Skip the table for this project and log a warning
    Ignorable,
    /// Try the same call again after a backoff
    Retryable,
    /// Report the table as failed for this project
    Fatal,
}

/// Hook deciding which API errors are ignorable
pub trait IgnorePolicy: Send + Sync {
    fn is_ignorable(&self, error: &ApiError) -> bool;
}

/// Ignores errors carrying any of a fixed set of reasons
#[derive(Debug, Clone)]
pub struct ReasonIgnorePolicy {
    reasons: Vec<String>,
}

impl ReasonIgnorePolicy {
    pub fn new(reasons: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            reasons: reasons.into_iter().map(Into::into).collect(),
        }
    }

    /// Default reasons plus `extra`
    pub fn with_defaults(extra: &[String]) -> Self {
        let mut policy = Self::new(DEFAULT_IGNORED_REASONS.iter().copied());
        policy.reasons.extend(extra.iter().cloned());
        policy
    }
}

impl Default for ReasonIgnorePolicy {
    fn default() -> Self {
        Self::with_defaults(&[])
    }
}

impl IgnorePolicy for ReasonIgnorePolicy {
    fn is_ignorable(&self, error: &ApiError) -> bool {
        self.reasons.iter().any(|r| error.has_reason(r))
    }
}

#[derive(Clone)]
pub struct ErrorClassifier {
    policy: Arc<dyn IgnorePolicy>,
}

impl ErrorClassifier {
    pub fn new(policy: Arc<dyn IgnorePolicy>) -> Self {
        Self { policy }
    }

    pub fn classify(&self, error: &FetchError) -> ErrorClass {
        match error {
            FetchError::Api(api) => {
                if self.policy.is_ignorable(api) {
                    ErrorClass::Ignorable
                } else if is_transient_status(api) {
                    ErrorClass::Retryable
                } else {
                    ErrorClass::Fatal
                }
            }
            FetchError::Transport { source, .. }
                if source.is_timeout() || source.is_connect() || source.is_request() =>
            {
                ErrorClass::Retryable
            }
            _ => ErrorClass::Fatal,
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Arc::new(ReasonIgnorePolicy::default()))
    }
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorClassifier").finish_non_exhaustive()
    }
}

fn is_transient_status(error: &ApiError) -> bool {
    error.status == StatusCode::TOO_MANY_REQUESTS
        || error.status.is_server_error()
        || RATE_LIMIT_REASONS.iter().any(|r| error.has_reason(r))
}
