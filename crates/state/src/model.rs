//! Persistent sync-state records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// How a detected conflict is resolved without operator input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// The local copy overwrites the remote one.
    LocalWins,
    /// The remote copy overwrites the local one.
    #[default]
    RemoteWins,
    /// Both copies survive under collision-suffixed names.
    RenameBoth,
}

impl ConflictPolicy {
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "local-wins" => Some(Self::LocalWins),
            "remote-wins" => Some(Self::RemoteWins),
            "rename-both" => Some(Self::RenameBoth),
            _ => None,
        }
    }
}

/// Which way reconciliation may move data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    Push,
    Pull,
    #[default]
    Bidirectional,
}

impl SyncDirection {
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "push" => Some(Self::Push),
            "pull" => Some(Self::Pull),
            "bidirectional" => Some(Self::Bidirectional),
            _ => None,
        }
    }

    /// Whether local changes may be written to the remote.
    #[must_use]
    pub const fn allows_push(self) -> bool {
        matches!(self, Self::Push | Self::Bidirectional)
    }

    /// Whether remote changes may be written locally.
    #[must_use]
    pub const fn allows_pull(self) -> bool {
        matches!(self, Self::Pull | Self::Bidirectional)
    }
}

/// One configured sync pair.
///
/// Created by `sync init`, mutated only by `sync init --id`, removed by
/// `sync remove`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub id: String,
    /// Absolute local root of the pair.
    pub local_root: PathBuf,
    /// Remote folder id the pair mirrors.
    pub remote_root_id: String,
    /// Glob patterns excluded from both sides.
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default)]
    pub direction: SyncDirection,
}

/// Per-file bookkeeping for one sync pair.
///
/// `(config id, rel_path)` is unique. Either `remote_id` is set or the path
/// exists purely locally. Tombstones record deletions until
/// `tombstone_until` passes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEntry {
    pub rel_path: String,
    #[serde(default)]
    pub local_size: Option<u64>,
    /// Local mtime as whole seconds since the epoch.
    #[serde(default)]
    pub local_mtime: Option<i64>,
    /// Content hash, computed lazily on suspicion of change.
    #[serde(default)]
    pub local_hash: Option<String>,
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub remote_hash: Option<String>,
    #[serde(default)]
    pub remote_mtime: Option<i64>,
    #[serde(default)]
    pub last_revision: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_sync: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub tombstone_until: Option<OffsetDateTime>,
}

impl SyncEntry {
    /// Returns `true` when the entry is an unexpired deletion tombstone.
    #[must_use]
    pub fn is_live_tombstone(&self, now: OffsetDateTime) -> bool {
        self.tombstone_until.is_some_and(|until| until > now)
    }
}
