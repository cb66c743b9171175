//! Tagged call outcomes shared by adapters, the resilience wrapper, the
//! enrichment scheduler and the sinks.
//!
//! Every network-facing operation in the crate returns an [`Outcome`] instead
//! of propagating an error: the variant says whether a retry may help.

use serde::{Deserialize, Serialize};

/// Why a call failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Network or connection error
    #[error("Network error: {0}")]
    Network(String),

    /// The attempt did not finish within its time budget
    #[error("Timed out after {millis} ms")]
    Timeout { millis: u64 },

    /// The remote side signalled rate limiting (HTTP 429, CAPTCHA page, ...)
    #[error("Rate limit exceeded")]
    RateLimit {
        /// Seconds suggested by a `Retry-After` header, when present
        retry_after: Option<u64>,
    },

    /// Non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Response could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// The request itself is malformed or unsupported
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Other error
    #[error("Error: {0}")]
    Other(String),
}

impl FailureReason {
    /// Whether another attempt could succeed.
    ///
    /// Network errors, timeouts, rate limits (429) and 5xx are transient;
    /// everything else (other 4xx, parse and request errors) is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            FailureReason::Network(_)
            | FailureReason::Timeout { .. }
            | FailureReason::RateLimit { .. } => true,
            FailureReason::Http { status, .. } => {
                *status == 429 || (500..600).contains(status)
            }
            FailureReason::Parse(_) | FailureReason::InvalidRequest(_) | FailureReason::Other(_) => {
                false
            }
        }
    }

    /// Build a reason from an HTTP status and (possibly empty) body excerpt.
    pub fn from_status(status: reqwest::StatusCode, retry_after: Option<u64>, body: &str) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return FailureReason::RateLimit { retry_after };
        }

        let message: String = body.chars().take(200).collect();
        FailureReason::Http {
            status: status.as_u16(),
            message: if message.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string()
            } else {
                message
            },
        }
    }
}

impl From<reqwest::Error> for FailureReason {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return FailureReason::Timeout { millis: 0 };
        }
        if let Some(status) = err.status() {
            return FailureReason::from_status(status, None, &err.to_string());
        }
        if err.is_builder() {
            return FailureReason::InvalidRequest(err.to_string());
        }
        if err.is_decode() {
            return FailureReason::Parse(err.to_string());
        }
        FailureReason::Network(err.to_string())
    }
}

impl From<serde_json::Error> for FailureReason {
    fn from(err: serde_json::Error) -> Self {
        FailureReason::Parse(format!("JSON: {}", err))
    }
}

/// Result of one call: success, or a failure tagged with its retry class.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    RetryableFailure(FailureReason),
    FatalFailure(FailureReason),
}

impl<T> Outcome<T> {
    /// Wrap a failure reason into the matching variant.
    pub fn failure(reason: FailureReason) -> Self {
        if reason.is_retryable() {
            Outcome::RetryableFailure(reason)
        } else {
            Outcome::FatalFailure(reason)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Outcome::RetryableFailure(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::FatalFailure(_))
    }

    /// The failure reason, if any.
    pub fn reason(&self) -> Option<&FailureReason> {
        match self {
            Outcome::Success(_) => None,
            Outcome::RetryableFailure(reason) | Outcome::FatalFailure(reason) => Some(reason),
        }
    }

    /// Discard the failure and keep the value, if any.
    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::RetryableFailure(reason) => Outcome::RetryableFailure(reason),
            Outcome::FatalFailure(reason) => Outcome::FatalFailure(reason),
        }
    }

    pub fn into_result(self) -> Result<T, FailureReason> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::RetryableFailure(reason) | Outcome::FatalFailure(reason) => Err(reason),
        }
    }
}

impl<T> From<Result<T, FailureReason>> for Outcome<T> {
    fn from(result: Result<T, FailureReason>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(reason) => Outcome::failure(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        let rate = FailureReason::from_status(StatusCode::TOO_MANY_REQUESTS, Some(5), "");
        assert_eq!(rate, FailureReason::RateLimit { retry_after: Some(5) });
        assert!(rate.is_retryable());

        assert!(FailureReason::from_status(StatusCode::BAD_GATEWAY, None, "").is_retryable());
        assert!(FailureReason::from_status(StatusCode::SERVICE_UNAVAILABLE, None, "").is_retryable());

        assert!(!FailureReason::from_status(StatusCode::NOT_FOUND, None, "").is_retryable());
        assert!(!FailureReason::from_status(StatusCode::FORBIDDEN, None, "").is_retryable());
        assert!(!FailureReason::from_status(StatusCode::BAD_REQUEST, None, "bad").is_retryable());
        assert!(!FailureReason::from_status(StatusCode::REQUEST_TIMEOUT, None, "").is_retryable());
    }

    #[test]
    fn test_outcome_from_result() {
        let ok: Outcome<u32> = Ok(3).into();
        assert_eq!(ok, Outcome::Success(3));

        let transient: Outcome<u32> = Err(FailureReason::Network("reset".into())).into();
        assert!(transient.is_retryable());

        let fatal: Outcome<u32> = Err(FailureReason::InvalidRequest("empty".into())).into();
        assert!(fatal.is_fatal());
        assert_eq!(
            fatal.reason(),
            Some(&FailureReason::InvalidRequest("empty".into()))
        );
    }

    #[test]
    fn test_empty_body_uses_canonical_reason() {
        match FailureReason::from_status(StatusCode::UNAUTHORIZED, None, "  ") {
            FailureReason::Http { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Unauthorized");
            }
            other => panic!("unexpected reason: {other:?}"),
        }
    }
}
