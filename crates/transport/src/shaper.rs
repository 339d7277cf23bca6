//! Request shaping.
//!
//! A stateless decoration step applied to every call before it is issued:
//! resource keys for involved items, shared-drive flags, and field masks.
//! The applied shape is recorded on the request context so tests can assert
//! what a call would have sent without a live server.

use dashmap::DashMap;

use gdrv_core::{FieldsPreset, RequestContext, RequestType};

/// Auxiliary header carrying resource keys for shared items.
pub const RESOURCE_KEYS_HEADER: &str = "X-Goog-Drive-Resource-Keys";

/// Cache of known resource keys, keyed by item id.
#[derive(Debug, Default)]
pub struct ResourceKeys {
    keys: DashMap<String, String>,
}

impl ResourceKeys {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers the resource key for an item.
    pub fn insert(&self, id: impl Into<String>, key: impl Into<String>) {
        self.keys.insert(id.into(), key.into());
    }

    /// Returns the resource key for `id`, if one is cached.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<String> {
        self.keys.get(id).map(|entry| entry.value().clone())
    }
}

/// The decoration applied to one request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestShape {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

/// Default field masks per preset, for list-shaped calls.
#[must_use]
pub const fn list_fields(preset: FieldsPreset) -> &'static str {
    match preset {
        FieldsPreset::Minimal => "nextPageToken, files(id, name, mimeType)",
        FieldsPreset::Standard => {
            "nextPageToken, files(id, name, mimeType, size, modifiedTime, parents, md5Checksum, trashed)"
        }
        FieldsPreset::Full => "*",
    }
}

/// Default field masks per preset, for single-item calls.
#[must_use]
pub const fn item_fields(preset: FieldsPreset) -> &'static str {
    match preset {
        FieldsPreset::Minimal => "id, name, mimeType",
        FieldsPreset::Standard => {
            "id, name, mimeType, size, modifiedTime, parents, md5Checksum, trashed, headRevisionId"
        }
        FieldsPreset::Full => "*",
    }
}

/// Builds the shape for a request described by `ctx`.
///
/// - Joins cached resource keys for every involved file and parent id into
///   the auxiliary header as `id/key` pairs.
/// - Sets `supportsAllDrives=true` unconditionally.
/// - Adds `driveId` plus `corpora=drive` on list calls scoped to a shared
///   drive, `corpora=user` otherwise.
/// - Applies the caller's field mask, falling back to the preset default.
#[must_use]
pub fn shape_request(
    ctx: &RequestContext,
    resource_keys: &ResourceKeys,
    fields: Option<&str>,
    preset: FieldsPreset,
) -> RequestShape {
    let mut shape = RequestShape::default();

    let mut pairs = Vec::new();
    for id in ctx
        .involved_file_ids()
        .iter()
        .chain(ctx.involved_parent_ids())
    {
        if let Some(key) = resource_keys.get(id) {
            pairs.push(format!("{id}/{key}"));
        }
    }
    if !pairs.is_empty() {
        shape
            .headers
            .push((RESOURCE_KEYS_HEADER.to_owned(), pairs.join(",")));
    }

    shape
        .query
        .push((String::from("supportsAllDrives"), String::from("true")));

    if ctx.request_type() == RequestType::ListOrSearch {
        if let Some(drive_id) = ctx.drive_id() {
            shape
                .query
                .push((String::from("driveId"), drive_id.to_owned()));
            shape
                .query
                .push((String::from("corpora"), String::from("drive")));
            shape
                .query
                .push((String::from("includeItemsFromAllDrives"), String::from("true")));
        } else {
            shape
                .query
                .push((String::from("corpora"), String::from("user")));
        }
    }

    let mask = fields.map_or_else(
        || match ctx.request_type() {
            RequestType::ListOrSearch => list_fields(preset).to_owned(),
            _ => item_fields(preset).to_owned(),
        },
        str::to_owned,
    );
    shape.query.push((String::from("fields"), mask));

    for (key, value) in &shape.query {
        ctx.record_shape(format!("{key}={value}"));
    }
    for (name, value) in &shape.headers {
        ctx.record_shape(format!("{name}: {value}"));
    }
    shape
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_keys_join_for_involved_ids_only() {
        let keys = ResourceKeys::new();
        keys.insert("file1", "rk1");
        keys.insert("parent1", "rk2");
        keys.insert("unrelated", "rk3");

        let mut ctx = RequestContext::new("default", RequestType::GetById);
        ctx.note_file_id("file1");
        ctx.note_file_id("file2"); // no cached key
        ctx.note_parent_id("parent1");

        let shape = shape_request(&ctx, &keys, None, FieldsPreset::Standard);
        let header = shape
            .headers
            .iter()
            .find(|(name, _)| name == RESOURCE_KEYS_HEADER)
            .expect("resource key header");
        assert_eq!(header.1, "file1/rk1,parent1/rk2");
    }

    #[test]
    fn no_header_when_nothing_has_a_key() {
        let keys = ResourceKeys::new();
        let mut ctx = RequestContext::new("default", RequestType::GetById);
        ctx.note_file_id("file1");
        let shape = shape_request(&ctx, &keys, None, FieldsPreset::Standard);
        assert!(shape.headers.is_empty());
    }

    #[test]
    fn shared_drive_scope_switches_the_corpora() {
        let keys = ResourceKeys::new();
        let ctx = RequestContext::new("default", RequestType::ListOrSearch)
            .with_drive_id("0ADrive");
        let shape = shape_request(&ctx, &keys, None, FieldsPreset::Standard);
        assert!(shape.query.contains(&(String::from("driveId"), String::from("0ADrive"))));
        assert!(shape.query.contains(&(String::from("corpora"), String::from("drive"))));

        let ctx = RequestContext::new("default", RequestType::ListOrSearch);
        let shape = shape_request(&ctx, &keys, None, FieldsPreset::Standard);
        assert!(shape.query.contains(&(String::from("corpora"), String::from("user"))));
    }

    #[test]
    fn all_drives_support_is_always_present() {
        let keys = ResourceKeys::new();
        let ctx = RequestContext::new("default", RequestType::Mutation);
        let shape = shape_request(&ctx, &keys, None, FieldsPreset::Minimal);
        assert!(shape
            .query
            .contains(&(String::from("supportsAllDrives"), String::from("true"))));
    }

    #[test]
    fn caller_mask_beats_the_preset_default() {
        let keys = ResourceKeys::new();
        let ctx = RequestContext::new("default", RequestType::GetById);
        let shape = shape_request(&ctx, &keys, Some("id, webViewLink"), FieldsPreset::Full);
        assert!(shape
            .query
            .contains(&(String::from("fields"), String::from("id, webViewLink"))));
    }

    #[test]
    fn the_applied_shape_is_recorded_on_the_context() {
        let keys = ResourceKeys::new();
        let ctx = RequestContext::new("default", RequestType::ListOrSearch);
        shape_request(&ctx, &keys, None, FieldsPreset::Minimal);
        let recorded = ctx.recorded_shapes();
        assert!(recorded.iter().any(|s| s == "supportsAllDrives=true"));
        assert!(recorded.iter().any(|s| s.starts_with("fields=")));
    }
}
