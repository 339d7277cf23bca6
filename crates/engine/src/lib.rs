//! # Overview
//!
//! `gdrv-engine` plans and applies bidirectional reconciliation between a
//! local directory tree and a remote folder. The two-phase contract is
//! explicit: [`SyncEngine::plan`] computes the action list and conflicts
//! without touching either side; [`SyncEngine::apply`] executes a plan with
//! a bounded worker pool. `status` is a plan that is never applied.
//!
//! # Design
//!
//! - Local state comes from a filesystem walk with exclude patterns and
//!   lazy MD5 confirmation ([`scan`]).
//! - Remote state prefers the incremental change feed when a cursor is
//!   stored, falling back to a subtree walk ([`remote`]).
//! - The diff matrix and conflict policies live in [`plan`]; execution and
//!   index bookkeeping live in [`apply`].
//!
//! # Invariants
//!
//! - Applying a plan over an unchanged tree issues no actions.
//! - Directory creations precede their children; deletions run
//!   children-first.
//! - After every successful action the index entry is upserted in one
//!   transaction.

pub mod apply;
pub mod plan;
pub mod remote;
pub mod scan;

use std::collections::BTreeMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use gdrv_core::AppResult;
use gdrv_state::{ConflictPolicy, SyncConfig, SyncDirection, SyncStateStore};

pub use apply::{ActionFailure, ApplyOptions, SyncSummary, TransferOps, TOMBSTONE_RETENTION};
pub use plan::{ActionKind, ConflictInfo, SideState, SyncAction, SyncPlan};
pub use remote::{apply_changes, ChangeBatch, RemoteChange, RemoteFileState, RemoteTree};
pub use scan::{compile_excludes, md5_file, scan_local, LocalFile};

/// Per-run options assembled from flags and configuration.
#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Propagate deletions.
    pub delete: bool,
    /// Plan only; never apply.
    pub dry_run: bool,
    pub concurrency: usize,
    pub continue_on_error: bool,
    /// Prefer the incremental change feed when a cursor is stored.
    pub use_changes: bool,
    pub policy_override: Option<ConflictPolicy>,
    pub direction_override: Option<SyncDirection>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            delete: true,
            dry_run: false,
            concurrency: 5,
            continue_on_error: true,
            use_changes: true,
            policy_override: None,
            direction_override: None,
        }
    }
}

/// Plans and applies reconciliation for configured sync pairs.
pub struct SyncEngine<'a> {
    store: &'a SyncStateStore,
}

impl<'a> SyncEngine<'a> {
    #[must_use]
    pub const fn new(store: &'a SyncStateStore) -> Self {
        Self { store }
    }

    /// Computes the reconciliation plan for `config`.
    ///
    /// When a change cursor is stored and `use_changes` is set, the remote
    /// snapshot is reconstructed from the index and patched with the change
    /// feed; otherwise the remote subtree is walked in full. Either way the
    /// cursor is advanced so the next pass can be incremental.
    pub async fn plan<R: RemoteTree>(
        &self,
        config: &SyncConfig,
        remote: &R,
        opts: &SyncOptions,
    ) -> AppResult<SyncPlan> {
        let excludes = compile_excludes(&config.excludes)?;
        let local = scan_local(&config.local_root, &excludes)?;
        let entries = self.store.list_entries(&config.id)?;

        let cursor = self.store.get_cursor(&config.id)?;
        let remote_by_path: BTreeMap<String, RemoteFileState> = match cursor {
            Some(token) if opts.use_changes => {
                let known: BTreeMap<String, RemoteFileState> = entries
                    .iter()
                    .filter_map(|entry| {
                        let id = entry.remote_id.clone()?;
                        Some((
                            id.clone(),
                            RemoteFileState {
                                rel_path: entry.rel_path.clone(),
                                id,
                                size: None,
                                md5: entry.remote_hash.clone(),
                                mtime: entry.remote_mtime,
                                revision: entry.last_revision.clone(),
                            },
                        ))
                    })
                    .collect();
                let batch = remote.changes_since(&config.remote_root_id, &token).await?;
                let folded = apply_changes(known, &batch);
                self.store.set_cursor(&config.id, &batch.new_start_token)?;
                folded
                    .into_values()
                    .filter(|state| !excludes.is_match(&state.rel_path))
                    .map(|state| (state.rel_path.clone(), state))
                    .collect()
            }
            _ => {
                let token = remote.start_token().await?;
                let walked = remote.walk(&config.remote_root_id).await?;
                self.store.set_cursor(&config.id, &token)?;
                walked
                    .into_iter()
                    .filter(|state| !excludes.is_match(&state.rel_path))
                    .map(|state| (state.rel_path.clone(), state))
                    .collect()
            }
        };

        let direction = opts.direction_override.unwrap_or(config.direction);
        let policy = opts.policy_override.unwrap_or(config.conflict_policy);
        let input = plan::PlanInput {
            entries: &entries,
            local: &local,
            remote: &remote_by_path,
            direction,
            policy,
            delete: opts.delete,
            now: OffsetDateTime::now_utc(),
        };
        let plan = plan::build_plan(&input, &mut |file| md5_file(&file.abs_path))?;
        tracing::info!(
            config = %config.id,
            actions = plan.actions.len(),
            conflicts = plan.conflicts.len(),
            "sync plan computed"
        );
        Ok(plan)
    }

    /// Applies a previously computed plan.
    pub async fn apply<T: TransferOps>(
        &self,
        config: &SyncConfig,
        plan: &SyncPlan,
        ops: &Arc<T>,
        opts: &SyncOptions,
        cancel: &CancellationToken,
    ) -> AppResult<SyncSummary> {
        let apply_opts = ApplyOptions {
            concurrency: opts.concurrency,
            continue_on_error: opts.continue_on_error,
        };
        apply::apply_plan(self.store, config, plan, ops, &apply_opts, cancel).await
    }
}
