//! Error types
//!
//! Every fetch outcome is either a completed item stream or one of these
//! values. Whether an error is skipped, retried or reported is decided by
//! [`crate::resource::ErrorClassifier`], never by the code that raised it.

use reqwest::StatusCode;
use serde_json::Value;

pub type Result<T> = std::result::Result<T, FetchError>;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("HTTP request error: {message}")]
    Transport {
        message: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Could not decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Output channel for table `{0}` is closed")]
    ChannelClosed(String),

    #[error("Unknown table `{0}`")]
    UnknownTable(String),
}

impl FetchError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn transport(source: reqwest::Error) -> Self {
        Self::Transport {
            message: source.to_string(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A non-success response from a Google API.
///
/// Google wraps failures in an envelope of the form:
///
/// ```json
/// {"error": {"code": 403, "message": "...", "status": "PERMISSION_DENIED",
///            "errors": [{"reason": "accessNotConfigured"}],
///            "details": [{"@type": "type.googleapis.com/google.rpc.ErrorInfo",
///                         "reason": "SERVICE_DISABLED"}]}}
/// ```
///
/// Both the legacy `errors[].reason` and the `ErrorInfo.reason` values are
/// collected into [`ApiError::reasons`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("API request failed with {status}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    /// Canonical status name, e.g. `PERMISSION_DENIED`
    pub code: Option<String>,
    pub message: String,
    pub reasons: Vec<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
            reasons: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    /// Build from a status and a raw response body. Bodies that are not a
    /// Google error envelope keep only the status.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let Ok(envelope) = serde_json::from_str::<Value>(body) else {
            return Self::new(status, status.canonical_reason().unwrap_or("unknown error"));
        };
        let Some(error) = envelope.get("error") else {
            return Self::new(status, status.canonical_reason().unwrap_or("unknown error"));
        };

        let message = error
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error"))
            .to_string();
        let code = error
            .get("status")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let legacy = error
            .get("errors")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|e| e.get("reason").and_then(|r| r.as_str()));

        let error_info = error
            .get("details")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter(|d| {
                d.get("@type")
                    .and_then(|t| t.as_str())
                    .is_some_and(|t| t.ends_with("google.rpc.ErrorInfo"))
            })
            .filter_map(|d| d.get("reason").and_then(|r| r.as_str()));

        let mut reasons: Vec<String> = Vec::new();
        for reason in legacy.chain(error_info) {
            if !reasons.iter().any(|r| r == reason) {
                reasons.push(reason.to_string());
            }
        }

        Self {
            status,
            code,
            message,
            reasons,
        }
    }

    pub fn has_reason(&self, reason: &str) -> bool {
        self.reasons.iter().any(|r| r == reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_legacy_and_error_info_reasons() {
        let body = r#"{"error": {
            "code": 403,
            "message": "Compute Engine API has not been used in project 123",
            "status": "PERMISSION_DENIED",
            "errors": [{"reason": "accessNotConfigured", "domain": "usageLimits"}],
            "details": [
                {"@type": "type.googleapis.com/google.rpc.ErrorInfo", "reason": "SERVICE_DISABLED"},
                {"@type": "type.googleapis.com/google.rpc.Help", "links": []}
            ]
        }}"#;

        let err = ApiError::from_response(StatusCode::FORBIDDEN, body);
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.code.as_deref(), Some("PERMISSION_DENIED"));
        assert_eq!(err.reasons, vec!["accessNotConfigured", "SERVICE_DISABLED"]);
        assert!(err.has_reason("SERVICE_DISABLED"));
    }

    #[test]
    fn test_non_json_body_keeps_status_only() {
        let err = ApiError::from_response(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.reasons.is_empty());
        assert_eq!(err.message, "Bad Gateway");
    }
}
