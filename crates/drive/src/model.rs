//! Remote-domain data model.
//!
//! Serde views over the platform's JSON resources, reduced to the fields
//! the CLI and the sync engine consume. Unknown fields are ignored so field
//! masks can widen without breaking deserialization.

use serde::{Deserialize, Serialize};

/// MIME type marking a folder.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
/// MIME type of spreadsheets.
pub const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";
/// MIME type of documents.
pub const DOCUMENT_MIME_TYPE: &str = "application/vnd.google-apps.document";
/// MIME type of presentations.
pub const PRESENTATION_MIME_TYPE: &str = "application/vnd.google-apps.presentation";

/// One file or folder.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Byte size as a decimal string, absent for native documents.
    pub size: Option<String>,
    pub modified_time: Option<String>,
    pub created_time: Option<String>,
    pub parents: Option<Vec<String>>,
    pub md5_checksum: Option<String>,
    pub trashed: Option<bool>,
    pub head_revision_id: Option<String>,
    pub resource_key: Option<String>,
    pub web_view_link: Option<String>,
    pub export_links: Option<serde_json::Map<String, serde_json::Value>>,
}

impl RemoteFile {
    /// Returns `true` when the item is a folder.
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Parses the decimal size string.
    #[must_use]
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.parse().ok())
    }

    /// Modification time as whole seconds since the epoch.
    #[must_use]
    pub fn mtime_unix(&self) -> Option<i64> {
        let raw = self.modified_time.as_deref()?;
        time::OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339)
            .ok()
            .map(time::OffsetDateTime::unix_timestamp)
    }
}

/// One page of a file listing.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileList {
    pub files: Vec<RemoteFile>,
    pub next_page_token: Option<String>,
}

/// A shared drive.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveInfo {
    pub id: String,
    pub name: String,
    pub created_time: Option<String>,
    pub hidden: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveList {
    pub drives: Vec<DriveInfo>,
    pub next_page_token: Option<String>,
}

/// One permission on a file or drive.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Permission {
    pub id: String,
    #[serde(rename = "type")]
    pub grantee_type: String,
    pub role: String,
    pub email_address: Option<String>,
    pub domain: Option<String>,
    pub allow_file_discovery: Option<bool>,
    pub expiration_time: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionList {
    pub permissions: Vec<Permission>,
    pub next_page_token: Option<String>,
}

/// One revision of a file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Revision {
    pub id: String,
    pub modified_time: Option<String>,
    pub size: Option<String>,
    pub md5_checksum: Option<String>,
    pub keep_forever: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RevisionList {
    pub revisions: Vec<Revision>,
}

/// One change-feed item.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Change {
    pub file_id: String,
    pub removed: bool,
    pub file: Option<RemoteFile>,
    pub time: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangeList {
    pub changes: Vec<Change>,
    pub next_page_token: Option<String>,
    pub new_start_page_token: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartPageToken {
    pub start_page_token: String,
}

/// Account and quota information from `about`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct About {
    pub user: AboutUser,
    pub storage_quota: StorageQuota,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AboutUser {
    pub display_name: String,
    pub email_address: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageQuota {
    pub limit: Option<String>,
    pub usage: Option<String>,
    pub usage_in_drive: Option<String>,
    pub usage_in_drive_trash: Option<String>,
}
