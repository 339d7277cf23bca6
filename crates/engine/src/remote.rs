//! Remote-side contracts consumed by the sync engine.
//!
//! The engine never talks HTTP itself; it sees the remote through two
//! contracts implemented by the files API wrapper: a subtree walk and an
//! incremental change feed. Providers return paths already relativized to
//! the configured remote root and filtered to that subtree.

use std::collections::BTreeMap;
use std::future::Future;

use gdrv_core::AppResult;

/// Snapshot of one remote file below the sync root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFileState {
    /// Path relative to the remote sync root, `/`-separated.
    pub rel_path: String,
    pub id: String,
    pub size: Option<u64>,
    /// Hex MD5 fingerprint reported by the platform.
    pub md5: Option<String>,
    /// Modification time as whole seconds since the epoch.
    pub mtime: Option<i64>,
    /// Head revision id, when the platform reports one.
    pub revision: Option<String>,
}

/// One item from the change feed, already scoped to the sync root.
#[derive(Clone, Debug)]
pub struct RemoteChange {
    pub file_id: String,
    /// The item was removed or trashed.
    pub removed: bool,
    /// Present unless `removed`.
    pub state: Option<RemoteFileState>,
}

/// A consumed page range of the change feed.
#[derive(Clone, Debug)]
pub struct ChangeBatch {
    pub changes: Vec<RemoteChange>,
    /// Token to persist for the next incremental pass.
    pub new_start_token: String,
}

/// Remote tree access used during planning.
pub trait RemoteTree {
    /// Walks the subtree under `root_id`, returning every file.
    fn walk(&self, root_id: &str) -> impl Future<Output = AppResult<Vec<RemoteFileState>>> + Send;

    /// Consumes the change feed from `token` to its current end.
    fn changes_since(
        &self,
        root_id: &str,
        token: &str,
    ) -> impl Future<Output = AppResult<ChangeBatch>> + Send;

    /// Returns a token pointing at the current end of the feed.
    fn start_token(&self) -> impl Future<Output = AppResult<String>> + Send;
}

impl<T: RemoteTree + Sync> RemoteTree for std::sync::Arc<T> {
    fn walk(&self, root_id: &str) -> impl Future<Output = AppResult<Vec<RemoteFileState>>> + Send {
        T::walk(self, root_id)
    }

    fn changes_since(
        &self,
        root_id: &str,
        token: &str,
    ) -> impl Future<Output = AppResult<ChangeBatch>> + Send {
        T::changes_since(self, root_id, token)
    }

    fn start_token(&self) -> impl Future<Output = AppResult<String>> + Send {
        T::start_token(self)
    }
}

/// Folds a change batch into a remote snapshot keyed by file id.
///
/// `known` is the remote state reconstructed from the index; changes update
/// it in place, removals drop entries.
#[must_use]
pub fn apply_changes(
    known: BTreeMap<String, RemoteFileState>,
    batch: &ChangeBatch,
) -> BTreeMap<String, RemoteFileState> {
    let mut by_id = known;
    for change in &batch.changes {
        if change.removed {
            by_id.remove(&change.file_id);
        } else if let Some(state) = &change.state {
            by_id.insert(change.file_id.clone(), state.clone());
        }
    }
    by_id
}
