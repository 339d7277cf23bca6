//! Centralized error taxonomy and exit-code definitions.
//!
//! This module provides the closed [`ErrorKind`] set shared by every crate in
//! the workspace together with [`AppError`], the structured error that crosses
//! crate boundaries and ultimately lands in the output envelope. All error
//! paths should classify into one of these kinds so exit codes and
//! machine-readable error codes stay consistent across commands.
//!
//! # Exit codes
//!
//! | Kinds | Exit code |
//! |-------|-----------|
//! | success | 0 |
//! | `AuthRequired`, `AuthExpired`, `AuthClientMissing`, `AuthClientPartial`, `ScopeInsufficient` | 2 |
//! | `InvalidArgument`, `InvalidPath` | 3 |
//! | `PermissionDenied` | 4 |
//! | `NotFound` | 5 |
//! | `Conflict` | 6 |
//! | `RateLimit` | 7 |
//! | `NetworkError`, `Transient` | 8 |
//! | `ExportSizeLimit` | 9 |
//! | `Cancelled` | 130 |
//! | everything else | 1 |

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of error kinds recognised across the workspace.
///
/// Each kind carries a stable machine-readable code (used in the envelope)
/// and a process exit code. New failure modes must map onto an existing kind
/// or extend this enum; ad-hoc string codes are not permitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No stored credentials for the requested profile, or a stored record
    /// belongs to a different OAuth client.
    AuthRequired,
    /// Credentials exist but can no longer be refreshed.
    AuthExpired,
    /// No OAuth client could be resolved from flags, environment, config, or
    /// the bundled fallback.
    AuthClientMissing,
    /// An OAuth client was only partially supplied (id without a required
    /// secret, or vice versa).
    AuthClientPartial,
    /// The stored credential lacks a scope the operation requires.
    ScopeInsufficient,
    /// The remote rejected the request as malformed (HTTP 400).
    InvalidArgument,
    /// A user-supplied path failed to resolve against the remote tree.
    InvalidPath,
    /// A path segment matched more than one remote item under strict mode.
    Ambiguous,
    /// The referenced item does not exist (HTTP 404).
    NotFound,
    /// The caller is not allowed to perform the operation (HTTP 403).
    PermissionDenied,
    /// The request conflicts with remote state (HTTP 409/412).
    Conflict,
    /// The caller exceeded a platform quota (HTTP 429 or quota reasons).
    RateLimit,
    /// A retryable server-side or connection-level failure (5xx, reset,
    /// timeout).
    Transient,
    /// A non-retryable transport failure.
    NetworkError,
    /// The requested export exceeds the platform's size limit.
    ExportSizeLimit,
    /// The command's cancellation context fired.
    Cancelled,
    /// Anything that does not classify into the kinds above.
    Unknown,
}

impl ErrorKind {
    /// Returns the stable machine-readable code emitted in the envelope.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::AuthExpired => "AUTH_EXPIRED",
            Self::AuthClientMissing => "AUTH_CLIENT_MISSING",
            Self::AuthClientPartial => "AUTH_CLIENT_PARTIAL",
            Self::ScopeInsufficient => "SCOPE_INSUFFICIENT",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::InvalidPath => "INVALID_PATH",
            Self::Ambiguous => "AMBIGUOUS",
            Self::NotFound => "NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Conflict => "CONFLICT",
            Self::RateLimit => "RATE_LIMIT",
            Self::Transient => "TRANSIENT",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ExportSizeLimit => "EXPORT_SIZE_LIMIT",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Returns the process exit code for this kind.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::AuthRequired
            | Self::AuthExpired
            | Self::AuthClientMissing
            | Self::AuthClientPartial
            | Self::ScopeInsufficient => 2,
            Self::InvalidArgument | Self::InvalidPath | Self::Ambiguous => 3,
            Self::PermissionDenied => 4,
            Self::NotFound => 5,
            Self::Conflict => 6,
            Self::RateLimit => 7,
            Self::NetworkError | Self::Transient => 8,
            Self::ExportSizeLimit => 9,
            Self::Cancelled => 130,
            Self::Unknown => 1,
        }
    }

    /// Returns `true` when the retry engine may absorb this kind.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimit)
    }

    /// Returns a short human-readable description of the kind.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::AuthRequired => "authentication required",
            Self::AuthExpired => "credentials expired",
            Self::AuthClientMissing => "no OAuth client configured",
            Self::AuthClientPartial => "incomplete OAuth client configuration",
            Self::ScopeInsufficient => "missing required scope",
            Self::InvalidArgument => "invalid argument",
            Self::InvalidPath => "path did not resolve",
            Self::Ambiguous => "path is ambiguous",
            Self::NotFound => "not found",
            Self::PermissionDenied => "permission denied",
            Self::Conflict => "conflicting remote state",
            Self::RateLimit => "rate limited",
            Self::Transient => "transient remote failure",
            Self::NetworkError => "network error",
            Self::ExportSizeLimit => "export size limit exceeded",
            Self::Cancelled => "operation cancelled",
            Self::Unknown => "unknown error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Structured error carried across crate boundaries and into the envelope.
///
/// The `context` map holds diagnostic fields such as `clientIdHash`,
/// `fileId`, `limit`, or `exportLinks`; keys are camelCase to match the
/// envelope schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppError {
    kind: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_reason: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    context: BTreeMap<String, serde_json::Value>,
}

impl AppError {
    /// Creates a new error of the given kind with a formatted message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status: None,
            remote_reason: None,
            context: BTreeMap::new(),
        }
    }

    /// Attaches the originating HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Attaches the remote reason token (e.g. `userRateLimitExceeded`).
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.remote_reason = Some(reason.into());
        self
    }

    /// Inserts a diagnostic field into the context map.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Returns the classified kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the originating HTTP status, when known.
    #[must_use]
    pub const fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    /// Returns the remote reason token, when known.
    #[must_use]
    pub fn remote_reason(&self) -> Option<&str> {
        self.remote_reason.as_deref()
    }

    /// Returns the diagnostic context map.
    #[must_use]
    pub const fn context(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.context
    }

    /// Returns the process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }

    /// Shorthand for a [`ErrorKind::Cancelled`] error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)?;
        if let Some(status) = self.http_status {
            write!(f, " (http {status})")?;
        }
        if let Some(reason) = &self.remote_reason {
            write!(f, " [{reason}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::new(ErrorKind::Unknown, format!("I/O failure: {error}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(ErrorKind::InvalidArgument, format!("malformed JSON: {error}"))
    }
}

/// Convenience alias used throughout the workspace.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_taxonomy_table() {
        assert_eq!(ErrorKind::AuthRequired.exit_code(), 2);
        assert_eq!(ErrorKind::AuthExpired.exit_code(), 2);
        assert_eq!(ErrorKind::AuthClientMissing.exit_code(), 2);
        assert_eq!(ErrorKind::AuthClientPartial.exit_code(), 2);
        assert_eq!(ErrorKind::ScopeInsufficient.exit_code(), 2);
        assert_eq!(ErrorKind::InvalidArgument.exit_code(), 3);
        assert_eq!(ErrorKind::InvalidPath.exit_code(), 3);
        assert_eq!(ErrorKind::PermissionDenied.exit_code(), 4);
        assert_eq!(ErrorKind::NotFound.exit_code(), 5);
        assert_eq!(ErrorKind::Conflict.exit_code(), 6);
        assert_eq!(ErrorKind::RateLimit.exit_code(), 7);
        assert_eq!(ErrorKind::NetworkError.exit_code(), 8);
        assert_eq!(ErrorKind::Transient.exit_code(), 8);
        assert_eq!(ErrorKind::ExportSizeLimit.exit_code(), 9);
        assert_eq!(ErrorKind::Cancelled.exit_code(), 130);
        assert_eq!(ErrorKind::Unknown.exit_code(), 1);
    }

    #[test]
    fn only_transient_and_rate_limit_are_retryable() {
        for kind in [
            ErrorKind::AuthRequired,
            ErrorKind::AuthExpired,
            ErrorKind::InvalidArgument,
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::Conflict,
            ErrorKind::ExportSizeLimit,
            ErrorKind::Cancelled,
            ErrorKind::Unknown,
        ] {
            assert!(!kind.is_retryable(), "{kind:?} must not be retryable");
        }
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
    }

    #[test]
    fn context_fields_round_trip_through_serde() {
        let error = AppError::new(ErrorKind::ExportSizeLimit, "file too large to export")
            .with_status(403)
            .with_reason("exportSizeLimitExceeded")
            .with_context("fileId", "abc123")
            .with_context("limit", 10_485_760_u64);

        let json = serde_json::to_value(&error).expect("serialize");
        assert_eq!(json["httpStatus"], 403);
        assert_eq!(json["remoteReason"], "exportSizeLimitExceeded");
        assert_eq!(json["context"]["fileId"], "abc123");

        let back: AppError = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.kind(), ErrorKind::ExportSizeLimit);
        assert_eq!(back.http_status(), Some(403));
    }

    #[test]
    fn display_includes_code_status_and_reason() {
        let error = AppError::new(ErrorKind::RateLimit, "slow down")
            .with_status(429)
            .with_reason("userRateLimitExceeded");
        let text = error.to_string();
        assert!(text.contains("RATE_LIMIT"));
        assert!(text.contains("429"));
        assert!(text.contains("userRateLimitExceeded"));
    }
}
