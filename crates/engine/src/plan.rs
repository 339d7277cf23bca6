//! Three-way diff and action planning.
//!
//! For every path known to either side or the index, the planner derives a
//! per-side state and folds the pair through the action matrix:
//!
//! - both unchanged → no-op
//! - one side changed, the other unchanged → propagate in that direction,
//!   subject to the configured direction and the delete flag
//! - both changed → conflict, resolved by the configured policy without
//!   executing anything
//! - both absent → drop the index entry
//!
//! Ordering guarantees are established here: transfers run shallow-first so
//! parents exist before children, deletions run children-first.

use std::collections::{BTreeMap, BTreeSet};

use time::OffsetDateTime;

use gdrv_core::AppResult;
use gdrv_state::{ConflictPolicy, SyncDirection, SyncEntry};

use crate::remote::RemoteFileState;
use crate::scan::LocalFile;

/// Change state of one side of a pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SideState {
    Absent,
    Unchanged,
    Modified,
    Created,
    Deleted,
}

impl SideState {
    #[must_use]
    const fn has_new_content(self) -> bool {
        matches!(self, Self::Modified | Self::Created)
    }
}

/// What an action does when applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Upload,
    Download,
    RemoteDelete,
    LocalDelete,
    RemoveEntry,
}

/// One planned reconciliation step.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAction {
    pub kind: ActionKind,
    /// Index path the action reconciles.
    pub rel_path: String,
    /// Where the payload lands; differs from `rel_path` only for
    /// rename-both conflict resolutions.
    pub target_rel_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl SyncAction {
    fn simple(kind: ActionKind, rel_path: &str, remote_id: Option<String>) -> Self {
        Self {
            kind,
            rel_path: rel_path.to_owned(),
            target_rel_path: rel_path.to_owned(),
            remote_id,
        }
    }
}

/// A detected conflict and how the policy resolved it.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub rel_path: String,
    pub local_state: SideState,
    pub remote_state: SideState,
    pub resolution: ConflictPolicy,
}

/// Output of the planning phase.
#[derive(Clone, Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPlan {
    pub actions: Vec<SyncAction>,
    pub conflicts: Vec<ConflictInfo>,
}

impl SyncPlan {
    /// `true` when the tree is already reconciled.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Everything the planner needs for one pass.
pub struct PlanInput<'a> {
    pub entries: &'a [SyncEntry],
    /// Local files keyed by relative path.
    pub local: &'a BTreeMap<String, LocalFile>,
    /// Remote files keyed by relative path.
    pub remote: &'a BTreeMap<String, RemoteFileState>,
    pub direction: SyncDirection,
    pub policy: ConflictPolicy,
    pub delete: bool,
    pub now: OffsetDateTime,
}

/// Derives the local-side state, hashing only when the cheap signals
/// (size, mtime) disagree with the index.
fn local_state(
    local: Option<&LocalFile>,
    entry: Option<&SyncEntry>,
    suppressed: bool,
    hasher: &mut dyn FnMut(&LocalFile) -> AppResult<String>,
) -> AppResult<SideState> {
    Ok(match (local, entry) {
        (None, None) => SideState::Absent,
        (Some(_), None) => SideState::Created,
        (None, Some(entry)) => {
            if suppressed || entry.local_size.is_none() {
                SideState::Absent
            } else {
                SideState::Deleted
            }
        }
        (Some(file), Some(entry)) => {
            if suppressed {
                SideState::Created
            } else if entry.local_size == Some(file.size) && entry.local_mtime == Some(file.mtime) {
                SideState::Unchanged
            } else {
                // Cheap signals differ; confirm with a content hash.
                let hash = hasher(file)?;
                if entry.local_hash.as_deref() == Some(hash.as_str()) {
                    SideState::Unchanged
                } else {
                    SideState::Modified
                }
            }
        }
    })
}

/// Derives the remote-side state from revision or content fingerprints.
fn remote_state(
    remote: Option<&RemoteFileState>,
    entry: Option<&SyncEntry>,
    suppressed: bool,
) -> SideState {
    match (remote, entry) {
        (None, None) => SideState::Absent,
        (Some(_), None) => SideState::Created,
        (None, Some(entry)) => {
            if suppressed || entry.remote_id.is_none() {
                SideState::Absent
            } else {
                SideState::Deleted
            }
        }
        (Some(state), Some(entry)) => {
            if entry.remote_id.is_none() {
                return SideState::Created;
            }
            let unchanged = match (&state.revision, &entry.last_revision) {
                (Some(current), Some(seen)) => current == seen,
                _ => state.md5 == entry.remote_hash && state.md5.is_some(),
            };
            if unchanged {
                if suppressed {
                    // A live tombstone hides a remote copy we already
                    // deleted, until it changes again.
                    SideState::Absent
                } else {
                    SideState::Unchanged
                }
            } else if suppressed {
                SideState::Created
            } else {
                SideState::Modified
            }
        }
    }
}

/// Builds collision-suffixed names for the rename-both policy.
///
/// `reports/a.txt` becomes `reports/a (local).txt` and
/// `reports/a (remote).txt`.
#[must_use]
pub fn collision_names(rel_path: &str) -> (String, String) {
    let (dir, name) = rel_path
        .rfind('/')
        .map_or(("", rel_path), |idx| (&rel_path[..=idx], &rel_path[idx + 1..]));
    let (stem, ext) = name
        .rfind('.')
        .filter(|idx| *idx > 0)
        .map_or((name, ""), |idx| (&name[..idx], &name[idx..]));
    (
        format!("{dir}{stem} (local){ext}"),
        format!("{dir}{stem} (remote){ext}"),
    )
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}

/// Runs the diff over the union of paths and produces the ordered plan.
pub fn build_plan(
    input: &PlanInput<'_>,
    hasher: &mut dyn FnMut(&LocalFile) -> AppResult<String>,
) -> AppResult<SyncPlan> {
    let entries_by_path: BTreeMap<&str, &SyncEntry> = input
        .entries
        .iter()
        .map(|entry| (entry.rel_path.as_str(), entry))
        .collect();

    let mut paths: BTreeSet<&str> = BTreeSet::new();
    paths.extend(input.local.keys().map(String::as_str));
    paths.extend(input.remote.keys().map(String::as_str));
    paths.extend(entries_by_path.keys().copied());

    let mut transfers = Vec::new();
    let mut deletes = Vec::new();
    let mut removals = Vec::new();
    let mut conflicts = Vec::new();

    for path in paths {
        let entry = entries_by_path.get(path).copied();
        let local = input.local.get(path);
        let remote = input.remote.get(path);
        let suppressed = entry.is_some_and(|e| e.is_live_tombstone(input.now));

        let l = local_state(local, entry, suppressed, hasher)?;
        let r = remote_state(remote, entry, suppressed);
        let remote_id = remote
            .map(|state| state.id.clone())
            .or_else(|| entry.and_then(|e| e.remote_id.clone()));

        match (l, r) {
            (SideState::Absent, SideState::Absent) => {
                if entry.is_some() && !suppressed {
                    removals.push(SyncAction::simple(ActionKind::RemoveEntry, path, None));
                }
            }
            (SideState::Unchanged, SideState::Unchanged) => {}
            (l, r) if l.has_new_content() && matches!(r, SideState::Unchanged | SideState::Absent) => {
                if input.direction.allows_push() {
                    transfers.push(SyncAction::simple(ActionKind::Upload, path, remote_id));
                }
            }
            (l, r) if r.has_new_content() && matches!(l, SideState::Unchanged | SideState::Absent) => {
                if input.direction.allows_pull() {
                    transfers.push(SyncAction::simple(ActionKind::Download, path, remote_id));
                }
            }
            (SideState::Deleted, SideState::Unchanged | SideState::Absent) => {
                if input.delete && input.direction.allows_push() {
                    if let Some(id) = remote_id {
                        deletes.push(SyncAction::simple(ActionKind::RemoteDelete, path, Some(id)));
                    } else {
                        removals.push(SyncAction::simple(ActionKind::RemoveEntry, path, None));
                    }
                }
            }
            (SideState::Unchanged | SideState::Absent, SideState::Deleted) => {
                if input.delete && input.direction.allows_pull() {
                    let kind = if local.is_some() {
                        ActionKind::LocalDelete
                    } else {
                        ActionKind::RemoveEntry
                    };
                    deletes.push(SyncAction::simple(kind, path, None));
                }
            }
            (SideState::Deleted, SideState::Deleted) => {
                removals.push(SyncAction::simple(ActionKind::RemoveEntry, path, None));
            }
            (l, r) => {
                // Both sides changed in some combination.
                conflicts.push(ConflictInfo {
                    rel_path: path.to_owned(),
                    local_state: l,
                    remote_state: r,
                    resolution: input.policy,
                });
                resolve_conflict(
                    input,
                    path,
                    l,
                    r,
                    remote_id,
                    &mut transfers,
                    &mut deletes,
                );
            }
        }
    }

    transfers.sort_by(|a, b| {
        depth(&a.target_rel_path)
            .cmp(&depth(&b.target_rel_path))
            .then_with(|| a.target_rel_path.cmp(&b.target_rel_path))
    });
    deletes.sort_by(|a, b| {
        depth(&b.target_rel_path)
            .cmp(&depth(&a.target_rel_path))
            .then_with(|| a.target_rel_path.cmp(&b.target_rel_path))
    });

    let mut actions = transfers;
    actions.append(&mut deletes);
    actions.append(&mut removals);
    Ok(SyncPlan { actions, conflicts })
}

fn resolve_conflict(
    input: &PlanInput<'_>,
    path: &str,
    local: SideState,
    remote: SideState,
    remote_id: Option<String>,
    transfers: &mut Vec<SyncAction>,
    deletes: &mut Vec<SyncAction>,
) {
    match input.policy {
        ConflictPolicy::LocalWins => {
            if local == SideState::Deleted {
                if input.delete && input.direction.allows_push() {
                    if let Some(id) = remote_id {
                        deletes.push(SyncAction::simple(ActionKind::RemoteDelete, path, Some(id)));
                    }
                }
            } else if input.direction.allows_push() {
                transfers.push(SyncAction::simple(ActionKind::Upload, path, remote_id));
            }
        }
        ConflictPolicy::RemoteWins => {
            if remote == SideState::Deleted {
                if input.delete && input.direction.allows_pull() {
                    deletes.push(SyncAction::simple(ActionKind::LocalDelete, path, None));
                }
            } else if input.direction.allows_pull() {
                transfers.push(SyncAction::simple(ActionKind::Download, path, remote_id));
            }
        }
        ConflictPolicy::RenameBoth => {
            // Delete-versus-modify keeps the surviving content under the
            // original name; content-versus-content preserves both copies.
            if local == SideState::Deleted {
                if input.direction.allows_pull() {
                    transfers.push(SyncAction::simple(ActionKind::Download, path, remote_id));
                }
                return;
            }
            if remote == SideState::Deleted {
                if input.direction.allows_push() {
                    transfers.push(SyncAction::simple(ActionKind::Upload, path, remote_id));
                }
                return;
            }
            let (local_name, remote_name) = collision_names(path);
            if input.direction.allows_push() {
                transfers.push(SyncAction {
                    kind: ActionKind::Upload,
                    rel_path: path.to_owned(),
                    target_rel_path: local_name,
                    remote_id: None,
                });
            }
            if input.direction.allows_pull() {
                transfers.push(SyncAction {
                    kind: ActionKind::Download,
                    rel_path: path.to_owned(),
                    target_rel_path: remote_name,
                    remote_id,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-06-01 12:00:00 UTC);

    fn local(rel: &str, size: u64, mtime: i64) -> (String, LocalFile) {
        (
            rel.to_owned(),
            LocalFile {
                rel_path: rel.to_owned(),
                abs_path: PathBuf::from(format!("/root/{rel}")),
                size,
                mtime,
            },
        )
    }

    fn remote(rel: &str, id: &str, md5: &str) -> (String, RemoteFileState) {
        (
            rel.to_owned(),
            RemoteFileState {
                rel_path: rel.to_owned(),
                id: id.to_owned(),
                size: Some(1),
                md5: Some(md5.to_owned()),
                mtime: Some(1_750_000_000),
                revision: None,
            },
        )
    }

    fn entry(rel: &str, size: u64, mtime: i64, hash: &str, remote_id: &str, md5: &str) -> SyncEntry {
        SyncEntry {
            rel_path: rel.to_owned(),
            local_size: Some(size),
            local_mtime: Some(mtime),
            local_hash: Some(hash.to_owned()),
            remote_id: Some(remote_id.to_owned()),
            remote_hash: Some(md5.to_owned()),
            remote_mtime: Some(1_750_000_000),
            last_revision: None,
            last_sync: Some(NOW),
            tombstone_until: None,
        }
    }

    fn plan(input: &PlanInput<'_>) -> SyncPlan {
        build_plan(input, &mut |file| {
            panic!("unexpected hash request for {}", file.rel_path)
        })
        .expect("plan")
    }

    fn input<'a>(
        entries: &'a [SyncEntry],
        local: &'a BTreeMap<String, LocalFile>,
        remote: &'a BTreeMap<String, RemoteFileState>,
    ) -> PlanInput<'a> {
        PlanInput {
            entries,
            local,
            remote,
            direction: SyncDirection::Bidirectional,
            policy: ConflictPolicy::RemoteWins,
            delete: true,
            now: NOW,
        }
    }

    #[test]
    fn unchanged_tree_plans_nothing() {
        let entries = vec![entry("a.txt", 3, 100, "h", "id-a", "m")];
        let local: BTreeMap<_, _> = [local("a.txt", 3, 100)].into_iter().collect();
        let remote: BTreeMap<_, _> = [remote("a.txt", "id-a", "m")].into_iter().collect();
        let plan = plan(&input(&entries, &local, &remote));
        assert!(plan.is_noop());
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn new_local_file_uploads() {
        let entries = vec![];
        let local: BTreeMap<_, _> = [local("new.txt", 5, 100)].into_iter().collect();
        let remote = BTreeMap::new();
        let plan = plan(&input(&entries, &local, &remote));
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].kind, ActionKind::Upload);
        assert_eq!(plan.actions[0].rel_path, "new.txt");
    }

    #[test]
    fn new_remote_file_downloads() {
        let entries = vec![];
        let local = BTreeMap::new();
        let remote: BTreeMap<_, _> = [remote("fresh.txt", "id-f", "m")].into_iter().collect();
        let plan = plan(&input(&entries, &local, &remote));
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].kind, ActionKind::Download);
        assert_eq!(plan.actions[0].remote_id.as_deref(), Some("id-f"));
    }

    #[test]
    fn direction_gates_propagation() {
        let entries = vec![];
        let local: BTreeMap<_, _> = [local("new.txt", 5, 100)].into_iter().collect();
        let remote: BTreeMap<_, _> = [remote("fresh.txt", "id-f", "m")].into_iter().collect();
        let mut in_ = input(&entries, &local, &remote);
        in_.direction = SyncDirection::Pull;
        let plan = plan(&in_);
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].kind, ActionKind::Download);
    }

    #[test]
    fn local_delete_propagates_only_with_the_delete_flag() {
        let entries = vec![entry("gone.txt", 3, 100, "h", "id-g", "m")];
        let local = BTreeMap::new();
        let remote: BTreeMap<_, _> = [remote("gone.txt", "id-g", "m")].into_iter().collect();

        let with_delete = plan(&input(&entries, &local, &remote));
        assert_eq!(with_delete.actions.len(), 1);
        assert_eq!(with_delete.actions[0].kind, ActionKind::RemoteDelete);

        let mut no_delete = input(&entries, &local, &remote);
        no_delete.delete = false;
        assert!(plan(&no_delete).is_noop());
    }

    #[test]
    fn remote_delete_propagates_locally() {
        let entries = vec![entry("gone.txt", 3, 100, "h", "id-g", "m")];
        let local: BTreeMap<_, _> = [local("gone.txt", 3, 100)].into_iter().collect();
        let remote = BTreeMap::new();
        let plan = plan(&input(&entries, &local, &remote));
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].kind, ActionKind::LocalDelete);
    }

    #[test]
    fn modified_both_sides_is_a_conflict_resolved_by_policy() {
        let entries = vec![entry("a.txt", 3, 100, "h", "id-a", "m-old")];
        // Local changed size; remote changed md5.
        let local: BTreeMap<_, _> = [local("a.txt", 9, 200)].into_iter().collect();
        let remote: BTreeMap<_, _> = [remote("a.txt", "id-a", "m-new")].into_iter().collect();

        let mut in_ = input(&entries, &local, &remote);
        let planned = build_plan(&in_, &mut |_| Ok(String::from("h-local-new"))).expect("plan");
        assert_eq!(planned.conflicts.len(), 1);
        assert_eq!(planned.actions.len(), 1);
        assert_eq!(planned.actions[0].kind, ActionKind::Download, "remote-wins default");

        in_.policy = ConflictPolicy::LocalWins;
        let planned = build_plan(&in_, &mut |_| Ok(String::from("h-local-new"))).expect("plan");
        assert_eq!(planned.actions[0].kind, ActionKind::Upload);
    }

    #[test]
    fn rename_both_preserves_both_copies() {
        let entries = vec![entry("reports/a.txt", 3, 100, "h", "id-a", "m-old")];
        let local: BTreeMap<_, _> = [local("reports/a.txt", 9, 200)].into_iter().collect();
        let remote: BTreeMap<_, _> = [remote("reports/a.txt", "id-a", "m-new")].into_iter().collect();
        let mut in_ = input(&entries, &local, &remote);
        in_.policy = ConflictPolicy::RenameBoth;

        let planned = build_plan(&in_, &mut |_| Ok(String::from("h-new"))).expect("plan");
        assert_eq!(planned.conflicts.len(), 1);
        assert_eq!(planned.actions.len(), 2);
        let upload = planned
            .actions
            .iter()
            .find(|a| a.kind == ActionKind::Upload)
            .expect("upload leg");
        assert_eq!(upload.target_rel_path, "reports/a (local).txt");
        let download = planned
            .actions
            .iter()
            .find(|a| a.kind == ActionKind::Download)
            .expect("download leg");
        assert_eq!(download.target_rel_path, "reports/a (remote).txt");
    }

    #[test]
    fn mtime_change_with_identical_hash_is_unchanged() {
        let entries = vec![entry("a.txt", 3, 100, "same-hash", "id-a", "m")];
        let local: BTreeMap<_, _> = [local("a.txt", 3, 999)].into_iter().collect();
        let remote: BTreeMap<_, _> = [remote("a.txt", "id-a", "m")].into_iter().collect();
        let planned = build_plan(&input(&entries, &local, &remote), &mut |_| {
            Ok(String::from("same-hash"))
        })
        .expect("plan");
        assert!(planned.is_noop(), "hash confirmation suppresses the upload");
    }

    #[test]
    fn both_absent_removes_the_entry() {
        let mut dangling = entry("ghost.txt", 3, 100, "h", "id-g", "m");
        dangling.local_size = None;
        dangling.local_mtime = None;
        dangling.local_hash = None;
        dangling.remote_id = None;
        let entries = vec![dangling];
        let plan = plan(&input(&entries, &BTreeMap::new(), &BTreeMap::new()));
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].kind, ActionKind::RemoveEntry);
    }

    #[test]
    fn live_tombstone_suppresses_resurrection() {
        let mut tombstone = entry("dead.txt", 3, 100, "h", "id-d", "m");
        tombstone.tombstone_until = Some(NOW + time::Duration::days(3));
        let entries = vec![tombstone];
        // Remote copy still visible with the fingerprint we recorded.
        let remote: BTreeMap<_, _> = [remote("dead.txt", "id-d", "m")].into_iter().collect();
        let plan = plan(&input(&entries, &BTreeMap::new(), &remote));
        assert!(plan.is_noop(), "unchanged remote stays suppressed");
    }

    #[test]
    fn modified_remote_behind_a_tombstone_downloads_again() {
        let mut tombstone = entry("dead.txt", 3, 100, "h", "id-d", "m-old");
        tombstone.tombstone_until = Some(NOW + time::Duration::days(3));
        let entries = vec![tombstone];
        let remote: BTreeMap<_, _> = [remote("dead.txt", "id-d", "m-new")].into_iter().collect();
        let plan = plan(&input(&entries, &BTreeMap::new(), &remote));
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].kind, ActionKind::Download);
    }

    #[test]
    fn transfers_shallow_first_deletes_children_first() {
        let entries = vec![
            entry("a/gone.txt", 1, 1, "h", "id-1", "m"),
            entry("gone-top.txt", 1, 1, "h", "id-2", "m"),
        ];
        let local: BTreeMap<_, _> = [
            local("deep/nested/new.txt", 1, 1),
            local("top.txt", 1, 1),
        ]
        .into_iter()
        .collect();
        let remote: BTreeMap<_, _> = [
            remote("a/gone.txt", "id-1", "m"),
            remote("gone-top.txt", "id-2", "m"),
        ]
        .into_iter()
        .collect();

        let plan = plan(&input(&entries, &local, &remote));
        let kinds: Vec<_> = plan
            .actions
            .iter()
            .map(|a| (a.kind, a.target_rel_path.as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ActionKind::Upload, "top.txt"),
                (ActionKind::Upload, "deep/nested/new.txt"),
                (ActionKind::RemoteDelete, "a/gone.txt"),
                (ActionKind::RemoteDelete, "gone-top.txt"),
            ]
        );
    }

    #[test]
    fn collision_names_keep_directory_and_extension() {
        assert_eq!(
            collision_names("reports/a.txt"),
            (String::from("reports/a (local).txt"), String::from("reports/a (remote).txt"))
        );
        assert_eq!(
            collision_names("no-ext"),
            (String::from("no-ext (local)"), String::from("no-ext (remote)"))
        );
        assert_eq!(
            collision_names(".hidden"),
            (String::from(".hidden (local)"), String::from(".hidden (remote)"))
        );
    }
}
