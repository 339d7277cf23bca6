//! Failure classification for remote calls.
//!
//! Every transport- or HTTP-level failure collapses into an [`ApiFailure`],
//! which [`classify`] maps onto the workspace error taxonomy. The mapping is
//! the single source of truth for retry eligibility and exit codes:
//!
//! | Observation | Kind |
//! |-------------|------|
//! | 5xx, connection reset, timeout | `Transient` |
//! | 429, or reason in {`userRateLimitExceeded`, `rateLimitExceeded`, `quotaExceeded`} | `RateLimit` |
//! | 401, or 403 with reason `authError` | `AuthExpired` |
//! | 403 with reason `exportSizeLimitExceeded` | `ExportSizeLimit` |
//! | other 403 | `PermissionDenied` |
//! | 404 | `NotFound` |
//! | 400 | `InvalidArgument` |
//! | 409, 412 | `Conflict` |
//! | anything else | `Unknown` |

use std::time::Duration;

use serde::Deserialize;

use gdrv_core::{AppError, ErrorKind};

/// Transport-level failure modes that never produced an HTTP status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// The request or connect timed out.
    Timeout,
    /// The peer reset or dropped the connection.
    Reset,
    /// Any other transport failure (DNS, TLS, proxy).
    Other,
}

/// Normalized failure for one remote call attempt.
#[derive(Clone, Debug)]
pub struct ApiFailure {
    /// HTTP status, when a response arrived.
    pub status: Option<u16>,
    /// Remote reason token extracted from the error body.
    pub reason: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// Server-advised delay from `Retry-After`.
    pub retry_after: Option<Duration>,
    /// Set when the failure happened below HTTP.
    pub connection: Option<ConnectionFailure>,
}

impl ApiFailure {
    /// Builds a failure from an HTTP status and the remote error body.
    #[must_use]
    pub fn from_response(status: u16, retry_after: Option<Duration>, body: &[u8]) -> Self {
        let parsed = parse_error_body(body);
        let message = parsed
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| format!("remote call failed with HTTP {status}"));
        let reason = parsed.and_then(|e| e.primary_reason());
        Self {
            status: Some(status),
            reason,
            message,
            retry_after,
            connection: None,
        }
    }

    /// Builds a failure from a transport error that never reached HTTP.
    #[must_use]
    pub fn from_transport(kind: ConnectionFailure, message: impl Into<String>) -> Self {
        Self {
            status: None,
            reason: None,
            message: message.into(),
            retry_after: None,
            connection: Some(kind),
        }
    }

    /// Normalizes a `reqwest` error.
    #[must_use]
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            ConnectionFailure::Timeout
        } else if error.is_connect() {
            ConnectionFailure::Reset
        } else {
            ConnectionFailure::Other
        };
        Self::from_transport(kind, error.to_string())
    }

    /// Converts into the workspace error, classifying on the way.
    #[must_use]
    pub fn into_app_error(self) -> AppError {
        let kind = classify(&self);
        let mut error = AppError::new(kind, self.message);
        if let Some(status) = self.status {
            error = error.with_status(status);
        }
        if let Some(reason) = self.reason {
            error = error.with_reason(reason);
        }
        error
    }
}

const RATE_LIMIT_REASONS: &[&str] = &[
    "userRateLimitExceeded",
    "rateLimitExceeded",
    "quotaExceeded",
];

/// Maps a failure onto the closed taxonomy.
#[must_use]
pub fn classify(failure: &ApiFailure) -> ErrorKind {
    if let Some(connection) = failure.connection {
        return match connection {
            ConnectionFailure::Timeout | ConnectionFailure::Reset => ErrorKind::Transient,
            ConnectionFailure::Other => ErrorKind::NetworkError,
        };
    }
    let Some(status) = failure.status else {
        return ErrorKind::Unknown;
    };
    let reason = failure.reason.as_deref();
    if RATE_LIMIT_REASONS.iter().any(|r| reason == Some(*r)) {
        return ErrorKind::RateLimit;
    }
    match status {
        500..=599 => ErrorKind::Transient,
        429 => ErrorKind::RateLimit,
        401 => ErrorKind::AuthExpired,
        403 => match reason {
            Some("authError") => ErrorKind::AuthExpired,
            Some("exportSizeLimitExceeded") => ErrorKind::ExportSizeLimit,
            _ => ErrorKind::PermissionDenied,
        },
        404 => ErrorKind::NotFound,
        400 => ErrorKind::InvalidArgument,
        409 | 412 => ErrorKind::Conflict,
        _ => ErrorKind::Unknown,
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<RemoteErrorItem>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteErrorItem {
    #[serde(default)]
    reason: Option<String>,
}

struct ParsedError {
    message: Option<String>,
    reasons: Vec<String>,
    status: Option<String>,
}

impl ParsedError {
    fn primary_reason(self) -> Option<String> {
        self.reasons.into_iter().next().or(self.status)
    }
}

fn parse_error_body(body: &[u8]) -> Option<ParsedError> {
    let envelope: ErrorEnvelope = serde_json::from_slice(body).ok()?;
    Some(ParsedError {
        message: envelope.error.message,
        reasons: envelope
            .error
            .errors
            .into_iter()
            .filter_map(|item| item.reason)
            .collect(),
        status: envelope.error.status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_failure(status: u16, reason: Option<&str>) -> ApiFailure {
        ApiFailure {
            status: Some(status),
            reason: reason.map(str::to_owned),
            message: String::from("test failure"),
            retry_after: None,
            connection: None,
        }
    }

    #[test]
    fn classification_table_matches_the_spec() {
        assert_eq!(classify(&http_failure(500, None)), ErrorKind::Transient);
        assert_eq!(classify(&http_failure(503, None)), ErrorKind::Transient);
        assert_eq!(classify(&http_failure(429, None)), ErrorKind::RateLimit);
        assert_eq!(classify(&http_failure(401, None)), ErrorKind::AuthExpired);
        assert_eq!(
            classify(&http_failure(403, Some("authError"))),
            ErrorKind::AuthExpired
        );
        assert_eq!(
            classify(&http_failure(403, Some("exportSizeLimitExceeded"))),
            ErrorKind::ExportSizeLimit
        );
        assert_eq!(
            classify(&http_failure(403, Some("insufficientFilePermissions"))),
            ErrorKind::PermissionDenied
        );
        assert_eq!(classify(&http_failure(403, None)), ErrorKind::PermissionDenied);
        assert_eq!(classify(&http_failure(404, None)), ErrorKind::NotFound);
        assert_eq!(classify(&http_failure(400, None)), ErrorKind::InvalidArgument);
        assert_eq!(classify(&http_failure(409, None)), ErrorKind::Conflict);
        assert_eq!(classify(&http_failure(412, None)), ErrorKind::Conflict);
        assert_eq!(classify(&http_failure(418, None)), ErrorKind::Unknown);
    }

    #[test]
    fn quota_reasons_trump_the_status_code() {
        assert_eq!(
            classify(&http_failure(403, Some("userRateLimitExceeded"))),
            ErrorKind::RateLimit
        );
        assert_eq!(
            classify(&http_failure(403, Some("quotaExceeded"))),
            ErrorKind::RateLimit
        );
    }

    #[test]
    fn transport_failures_classify_by_connection_kind() {
        let timeout = ApiFailure::from_transport(ConnectionFailure::Timeout, "timed out");
        assert_eq!(classify(&timeout), ErrorKind::Transient);
        let reset = ApiFailure::from_transport(ConnectionFailure::Reset, "reset by peer");
        assert_eq!(classify(&reset), ErrorKind::Transient);
        let other = ApiFailure::from_transport(ConnectionFailure::Other, "dns failure");
        assert_eq!(classify(&other), ErrorKind::NetworkError);
    }

    #[test]
    fn error_body_supplies_message_and_reason() {
        let body = br#"{"error":{"code":403,"message":"Rate limit exceeded.","errors":[{"reason":"userRateLimitExceeded","domain":"usageLimits"}]}}"#;
        let failure = ApiFailure::from_response(403, None, body);
        assert_eq!(failure.reason.as_deref(), Some("userRateLimitExceeded"));
        assert_eq!(failure.message, "Rate limit exceeded.");
        assert_eq!(classify(&failure), ErrorKind::RateLimit);
    }

    #[test]
    fn unreadable_body_falls_back_to_the_status() {
        let failure = ApiFailure::from_response(502, None, b"<html>bad gateway</html>");
        assert!(failure.message.contains("502"));
        assert_eq!(classify(&failure), ErrorKind::Transient);
    }

    #[test]
    fn into_app_error_preserves_status_and_reason() {
        let failure = http_failure(429, Some("rateLimitExceeded"));
        let error = failure.into_app_error();
        assert_eq!(error.kind(), ErrorKind::RateLimit);
        assert_eq!(error.http_status(), Some(429));
        assert_eq!(error.remote_reason(), Some("rateLimitExceeded"));
    }
}
