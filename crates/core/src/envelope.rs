//! Machine-readable output envelope.
//!
//! Every command emits exactly one envelope on stdout:
//!
//! ```json
//! { "schemaVersion": "1", "traceId": "<uuid>", "command": "files.list",
//!   "data": {}, "warnings": [], "errors": [] }
//! ```
//!
//! # Invariants
//!
//! - An envelope carries either a `data` payload or a single structured
//!   error, never both.
//! - `traceId` is the per-command UUID also present on every log record.
//! - `schemaVersion` is constant within a release.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Envelope schema version emitted by this release.
pub const SCHEMA_VERSION: &str = "1";

/// Non-fatal notice carried alongside a command's result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    /// Stable machine-readable warning code.
    pub code: String,
    /// Human-readable explanation.
    pub message: String,
    /// Either `"info"` or `"warning"`.
    pub severity: Severity,
}

/// Severity attached to a [`Warning`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

impl Warning {
    /// Creates a warning-severity notice.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    /// Creates an info-severity notice.
    #[must_use]
    pub fn info(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: Severity::Info,
        }
    }
}

/// Structured error as it appears in the envelope's `errors` array.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

impl From<&AppError> for EnvelopeError {
    fn from(error: &AppError) -> Self {
        let context = if error.context().is_empty() {
            None
        } else {
            Some(
                error
                    .context()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )
        };
        Self {
            code: error.kind().code().to_owned(),
            message: error.message().to_owned(),
            http_status: error.http_status(),
            remote_reason: error.remote_reason().map(str::to_owned),
            context,
        }
    }
}

/// The envelope emitted on stdout for every command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub schema_version: String,
    pub trace_id: Uuid,
    pub command: String,
    pub data: Option<serde_json::Value>,
    pub warnings: Vec<Warning>,
    pub errors: Vec<EnvelopeError>,
}

impl Envelope {
    /// Builds a success envelope around `data`.
    #[must_use]
    pub fn success(
        trace_id: Uuid,
        command: impl Into<String>,
        data: serde_json::Value,
        warnings: Vec<Warning>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_owned(),
            trace_id,
            command: command.into(),
            data: Some(data),
            warnings,
            errors: Vec::new(),
        }
    }

    /// Builds a failure envelope with `data = null` and one structured error.
    #[must_use]
    pub fn failure(
        trace_id: Uuid,
        command: impl Into<String>,
        error: &AppError,
        warnings: Vec<Warning>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_owned(),
            trace_id,
            command: command.into(),
            data: None,
            warnings,
            errors: vec![EnvelopeError::from(error)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn success_envelope_has_data_and_no_errors() {
        let envelope = Envelope::success(
            Uuid::new_v4(),
            "files.list",
            serde_json::json!({"files": []}),
            Vec::new(),
        );
        assert!(envelope.data.is_some());
        assert!(envelope.errors.is_empty());
        assert_eq!(envelope.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn failure_envelope_has_null_data_and_one_error() {
        let error = AppError::new(ErrorKind::NotFound, "no such file").with_status(404);
        let envelope = Envelope::failure(Uuid::new_v4(), "files.get", &error, Vec::new());
        assert!(envelope.data.is_none());
        assert_eq!(envelope.errors.len(), 1);
        assert_eq!(envelope.errors[0].code, "NOT_FOUND");
        assert_eq!(envelope.errors[0].http_status, Some(404));
    }

    #[test]
    fn envelope_serializes_with_camel_case_keys() {
        let envelope = Envelope::success(
            Uuid::new_v4(),
            "about",
            serde_json::json!({}),
            vec![Warning::new("PLAIN_STORAGE", "credentials stored unencrypted")],
        );
        let json = serde_json::to_value(&envelope).expect("serialize");
        assert!(json.get("schemaVersion").is_some());
        assert!(json.get("traceId").is_some());
        assert_eq!(json["warnings"][0]["severity"], "warning");
    }
}
