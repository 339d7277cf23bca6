//! Per-command request context.
//!
//! Replaces global flag structs: the CLI builds one [`RequestContext`] per
//! command and threads it through authentication, path resolution, request
//! shaping, and retry. Tests construct contexts directly.

use std::sync::Mutex;

use uuid::Uuid;

/// Coarse classification of a remote request, used to decide retry
/// eligibility and to label log records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestType {
    ListOrSearch,
    GetById,
    Mutation,
    DownloadOrExport,
    PermissionOp,
}

impl RequestType {
    /// Returns `true` when requests of this type may be retried
    /// unconditionally. Mutations need a per-operation idempotency check.
    #[must_use]
    pub const fn is_idempotent(self) -> bool {
        matches!(
            self,
            Self::ListOrSearch | Self::GetById | Self::DownloadOrExport | Self::PermissionOp
        )
    }

    /// Stable label used in log records.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ListOrSearch => "list-or-search",
            Self::GetById => "get-by-id",
            Self::Mutation => "mutation",
            Self::DownloadOrExport => "download-or-export",
            Self::PermissionOp => "permission-op",
        }
    }
}

/// Context accumulated through a command's lifetime.
///
/// The request shaper reads the involved-id lists to attach resource keys;
/// the retry engine logs the trace id and request type; tests inspect the
/// recorded shapes.
#[derive(Debug)]
pub struct RequestContext {
    profile: String,
    drive_id: Option<String>,
    involved_file_ids: Vec<String>,
    involved_parent_ids: Vec<String>,
    request_type: RequestType,
    trace_id: Uuid,
    shapes: Mutex<Vec<String>>,
}

impl RequestContext {
    /// Creates a context with a fresh trace id.
    #[must_use]
    pub fn new(profile: impl Into<String>, request_type: RequestType) -> Self {
        Self::with_trace_id(profile, request_type, Uuid::new_v4())
    }

    /// Creates a context bound to an existing trace id (shared with the
    /// output writer).
    #[must_use]
    pub fn with_trace_id(
        profile: impl Into<String>,
        request_type: RequestType,
        trace_id: Uuid,
    ) -> Self {
        Self {
            profile: profile.into(),
            drive_id: None,
            involved_file_ids: Vec::new(),
            involved_parent_ids: Vec::new(),
            request_type,
            trace_id,
            shapes: Mutex::new(Vec::new()),
        }
    }

    /// Scopes the context to a shared drive.
    #[must_use]
    pub fn with_drive_id(mut self, drive_id: impl Into<String>) -> Self {
        self.drive_id = Some(drive_id.into());
        self
    }

    /// Notes a file id involved in the request.
    pub fn note_file_id(&mut self, id: impl Into<String>) {
        self.involved_file_ids.push(id.into());
    }

    /// Notes a parent id involved in the request.
    pub fn note_parent_id(&mut self, id: impl Into<String>) {
        self.involved_parent_ids.push(id.into());
    }

    #[must_use]
    pub fn profile(&self) -> &str {
        &self.profile
    }

    #[must_use]
    pub fn drive_id(&self) -> Option<&str> {
        self.drive_id.as_deref()
    }

    #[must_use]
    pub fn involved_file_ids(&self) -> &[String] {
        &self.involved_file_ids
    }

    #[must_use]
    pub fn involved_parent_ids(&self) -> &[String] {
        &self.involved_parent_ids
    }

    #[must_use]
    pub const fn request_type(&self) -> RequestType {
        self.request_type
    }

    #[must_use]
    pub const fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    /// Records the shape applied to a request; consumed by tests.
    pub fn record_shape(&self, shape: impl Into<String>) {
        self.shapes
            .lock()
            .expect("shape log poisoned")
            .push(shape.into());
    }

    /// Returns the shapes recorded so far.
    #[must_use]
    pub fn recorded_shapes(&self) -> Vec<String> {
        self.shapes.lock().expect("shape log poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_matches_request_type_table() {
        assert!(RequestType::ListOrSearch.is_idempotent());
        assert!(RequestType::GetById.is_idempotent());
        assert!(RequestType::DownloadOrExport.is_idempotent());
        assert!(RequestType::PermissionOp.is_idempotent());
        assert!(!RequestType::Mutation.is_idempotent());
    }

    #[test]
    fn recorded_shapes_accumulate() {
        let ctx = RequestContext::new("default", RequestType::GetById);
        ctx.record_shape("supportsAllDrives=true");
        ctx.record_shape("fields=id,name");
        assert_eq!(ctx.recorded_shapes().len(), 2);
    }
}
