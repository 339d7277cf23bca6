//! Plan application with a bounded worker pool.
//!
//! Transfers run concurrently up to the configured worker count; deletions
//! run afterwards in the children-first order the planner established.
//! After every successful action the corresponding index entry is upserted
//! in a single transaction. Failures are recorded per file;
//! `continue_on_error` decides whether the batch keeps going. Cancellation
//! drains in-flight actions before returning.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use gdrv_core::{AppError, AppResult, ErrorKind};
use gdrv_state::{SyncConfig, SyncEntry, SyncStateStore};

use crate::plan::{ActionKind, SyncAction, SyncPlan};
use crate::remote::RemoteFileState;
use crate::scan::md5_file;

/// Deleted entries are remembered this long to suppress resurrection.
pub const TOMBSTONE_RETENTION: time::Duration = time::Duration::days(7);

/// Remote mutation contract the applier delegates to.
///
/// Implemented by the files API wrapper; tests substitute an in-memory
/// remote.
pub trait TransferOps: Send + Sync + 'static {
    /// Uploads `local_path` as `target_rel_path` under the sync root,
    /// creating intermediate folders. Updates in place when `existing_id`
    /// is set.
    fn upload(
        &self,
        local_path: &Path,
        target_rel_path: &str,
        existing_id: Option<&str>,
    ) -> impl Future<Output = AppResult<RemoteFileState>> + Send;

    /// Downloads `remote_id` to `target_path`, creating parent directories.
    fn download(
        &self,
        remote_id: &str,
        target_path: &Path,
    ) -> impl Future<Output = AppResult<RemoteFileState>> + Send;

    /// Renames the remote item, returning its refreshed state.
    fn rename_remote(
        &self,
        remote_id: &str,
        new_name: &str,
    ) -> impl Future<Output = AppResult<RemoteFileState>> + Send;

    /// Moves the remote item to the trash.
    fn delete_remote(&self, remote_id: &str) -> impl Future<Output = AppResult<()>> + Send;
}

/// Apply-phase tuning.
#[derive(Clone, Copy, Debug)]
pub struct ApplyOptions {
    pub concurrency: usize,
    pub continue_on_error: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            continue_on_error: true,
        }
    }
}

/// One recorded per-file failure.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionFailure {
    pub rel_path: String,
    pub kind: ActionKind,
    pub message: String,
}

/// Outcome counters for one apply pass.
#[derive(Clone, Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub uploaded: u64,
    pub downloaded: u64,
    pub deleted_local: u64,
    pub deleted_remote: u64,
    pub entries_removed: u64,
    pub conflicts: u64,
    pub failures: Vec<ActionFailure>,
}

enum TransferOutcome {
    Uploaded(RemoteFileState),
    Downloaded(RemoteFileState),
}

/// Applies `plan` against the local tree and the remote.
pub async fn apply_plan<T: TransferOps>(
    store: &SyncStateStore,
    config: &SyncConfig,
    plan: &SyncPlan,
    ops: &Arc<T>,
    opts: &ApplyOptions,
    cancel: &CancellationToken,
) -> AppResult<SyncSummary> {
    let mut summary = SyncSummary {
        conflicts: plan.conflicts.len() as u64,
        ..SyncSummary::default()
    };
    let batch_cancel = cancel.child_token();

    let (transfers, rest): (Vec<_>, Vec<_>) = plan
        .actions
        .iter()
        .cloned()
        .partition(|action| matches!(action.kind, ActionKind::Upload | ActionKind::Download));

    run_transfers(
        store,
        config,
        transfers,
        ops,
        opts,
        &batch_cancel,
        &mut summary,
    )
    .await?;

    // Deletions and entry removals stay on the issuing task so the
    // children-first order from the planner is preserved exactly.
    for action in rest {
        if batch_cancel.is_cancelled() {
            return Err(AppError::cancelled());
        }
        let applied = apply_sequential(store, config, &action, ops).await;
        match applied {
            Ok(()) => match action.kind {
                ActionKind::LocalDelete => summary.deleted_local += 1,
                ActionKind::RemoteDelete => summary.deleted_remote += 1,
                ActionKind::RemoveEntry => summary.entries_removed += 1,
                ActionKind::Upload | ActionKind::Download => unreachable!("partitioned above"),
            },
            Err(error) => {
                tracing::warn!(path = %action.rel_path, %error, "sync action failed");
                summary.failures.push(ActionFailure {
                    rel_path: action.rel_path.clone(),
                    kind: action.kind,
                    message: error.message().to_owned(),
                });
                if !opts.continue_on_error {
                    batch_cancel.cancel();
                    return Ok(summary);
                }
            }
        }
    }
    Ok(summary)
}

async fn run_transfers<T: TransferOps>(
    store: &SyncStateStore,
    config: &SyncConfig,
    transfers: Vec<SyncAction>,
    ops: &Arc<T>,
    opts: &ApplyOptions,
    cancel: &CancellationToken,
    summary: &mut SyncSummary,
) -> AppResult<()> {
    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let mut pool: JoinSet<(SyncAction, AppResult<TransferOutcome>)> = JoinSet::new();

    for action in transfers {
        if cancel.is_cancelled() {
            break;
        }
        let permit_source = Arc::clone(&semaphore);
        let ops = Arc::clone(ops);
        let local_root = config.local_root.clone();
        let token = cancel.clone();
        pool.spawn(async move {
            let Ok(_permit) = permit_source.acquire_owned().await else {
                return (action, Err(AppError::cancelled()));
            };
            if token.is_cancelled() {
                return (action, Err(AppError::cancelled()));
            }
            let outcome = run_one_transfer(&local_root, &action, ops.as_ref()).await;
            (action, outcome)
        });
    }

    // Drain every in-flight worker even after a failure or cancellation so
    // no transfer is abandoned mid-write.
    while let Some(joined) = pool.join_next().await {
        let (action, outcome) = joined.map_err(|error| {
            AppError::new(ErrorKind::Unknown, format!("sync worker panicked: {error}"))
        })?;
        match outcome {
            Ok(TransferOutcome::Uploaded(state)) => {
                summary.uploaded += 1;
                record_transfer(store, config, &action, state)?;
            }
            Ok(TransferOutcome::Downloaded(state)) => {
                summary.downloaded += 1;
                record_transfer(store, config, &action, state)?;
            }
            Err(error) if error.kind() == ErrorKind::Cancelled => {
                summary.failures.push(ActionFailure {
                    rel_path: action.rel_path.clone(),
                    kind: action.kind,
                    message: String::from("cancelled before dispatch"),
                });
            }
            Err(error) => {
                tracing::warn!(path = %action.rel_path, %error, "transfer failed");
                summary.failures.push(ActionFailure {
                    rel_path: action.rel_path.clone(),
                    kind: action.kind,
                    message: error.message().to_owned(),
                });
                if !opts.continue_on_error {
                    cancel.cancel();
                }
            }
        }
    }
    Ok(())
}

async fn run_one_transfer<T: TransferOps>(
    local_root: &Path,
    action: &SyncAction,
    ops: &T,
) -> AppResult<TransferOutcome> {
    let renamed = action.target_rel_path != action.rel_path;
    match action.kind {
        ActionKind::Upload => {
            let source = local_root.join(&action.rel_path);
            let path = if renamed {
                // Rename-both keeps the local copy under its suffixed name
                // so both sides converge on the same pair of files.
                let target = local_root.join(&action.target_rel_path);
                std::fs::rename(&source, &target).map_err(|error| {
                    AppError::new(
                        ErrorKind::Unknown,
                        format!("failed to rename {}: {error}", source.display()),
                    )
                })?;
                target
            } else {
                source
            };
            let state = ops
                .upload(&path, &action.target_rel_path, action.remote_id.as_deref())
                .await?;
            Ok(TransferOutcome::Uploaded(state))
        }
        ActionKind::Download => {
            let mut remote_id = action.remote_id.clone().ok_or_else(|| {
                AppError::new(ErrorKind::Unknown, "download action without a remote id")
            })?;
            if renamed {
                let new_name = action
                    .target_rel_path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&action.target_rel_path);
                let state = ops.rename_remote(&remote_id, new_name).await?;
                remote_id = state.id;
            }
            let target = local_root.join(&action.target_rel_path);
            let state = ops.download(&remote_id, &target).await?;
            Ok(TransferOutcome::Downloaded(state))
        }
        _ => unreachable!("only transfers reach the pool"),
    }
}

async fn apply_sequential<T: TransferOps>(
    store: &SyncStateStore,
    config: &SyncConfig,
    action: &SyncAction,
    ops: &Arc<T>,
) -> AppResult<()> {
    match action.kind {
        ActionKind::RemoteDelete => {
            let remote_id = action.remote_id.as_deref().ok_or_else(|| {
                AppError::new(ErrorKind::Unknown, "remote delete without a remote id")
            })?;
            ops.delete_remote(remote_id).await?;
            tombstone_entry(store, config, &action.rel_path)?;
        }
        ActionKind::LocalDelete => {
            let path = config.local_root.join(&action.rel_path);
            if path.exists() {
                std::fs::remove_file(&path).map_err(|error| {
                    AppError::new(
                        ErrorKind::Unknown,
                        format!("failed to delete {}: {error}", path.display()),
                    )
                })?;
            }
            tombstone_entry(store, config, &action.rel_path)?;
        }
        ActionKind::RemoveEntry => {
            store.remove_entry(&config.id, &action.rel_path)?;
        }
        ActionKind::Upload | ActionKind::Download => unreachable!("transfers run in the pool"),
    }
    Ok(())
}

fn record_transfer(
    store: &SyncStateStore,
    config: &SyncConfig,
    action: &SyncAction,
    remote: RemoteFileState,
) -> AppResult<()> {
    let local_path = config.local_root.join(&action.target_rel_path);
    let entry = entry_from_sides(&action.target_rel_path, &local_path, &remote)?;
    store.upsert_entry(&config.id, &entry)?;
    if action.target_rel_path != action.rel_path {
        // The original colliding path no longer exists on either side.
        store.remove_entry(&config.id, &action.rel_path)?;
    }
    Ok(())
}

fn entry_from_sides(
    rel_path: &str,
    local_path: &Path,
    remote: &RemoteFileState,
) -> AppResult<SyncEntry> {
    let metadata = std::fs::metadata(local_path).map_err(|error| {
        AppError::new(
            ErrorKind::Unknown,
            format!("failed to stat {}: {error}", local_path.display()),
        )
    })?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .and_then(|duration| i64::try_from(duration.as_secs()).ok())
        .unwrap_or(0);
    Ok(SyncEntry {
        rel_path: rel_path.to_owned(),
        local_size: Some(metadata.len()),
        local_mtime: Some(mtime),
        local_hash: Some(md5_file(local_path)?),
        remote_id: Some(remote.id.clone()),
        remote_hash: remote.md5.clone(),
        remote_mtime: remote.mtime,
        last_revision: remote.revision.clone(),
        last_sync: Some(OffsetDateTime::now_utc()),
        tombstone_until: None,
    })
}

fn tombstone_entry(store: &SyncStateStore, config: &SyncConfig, rel_path: &str) -> AppResult<()> {
    // The remote fingerprint is kept so a lagging remote listing of the
    // deleted item stays suppressed until the tombstone expires.
    let previous = store.get_entry(&config.id, rel_path)?.unwrap_or_default();
    let entry = SyncEntry {
        rel_path: rel_path.to_owned(),
        local_size: None,
        local_mtime: None,
        local_hash: None,
        tombstone_until: Some(OffsetDateTime::now_utc() + TOMBSTONE_RETENTION),
        last_sync: Some(OffsetDateTime::now_utc()),
        ..previous
    };
    store.upsert_entry(&config.id, &entry)
}
