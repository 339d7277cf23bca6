//! Path-to-id resolution with a TTL-bounded cache.
//!
//! User-supplied operands are either opaque ids or human paths. Paths are
//! resolved segment by segment with child queries against the remote tree;
//! resolved mappings are cached per drive scope with a TTL (default 300 s)
//! and invalidated eagerly by mutation commands.
//!
//! # Edge cases
//!
//! - `/` resolves to the scope root; a trailing `/` is normalised away.
//! - `.` and `..` segments are rejected as [`ErrorKind::InvalidPath`].
//! - A segment matching more than one child fails with
//!   [`ErrorKind::Ambiguous`] under strict mode; otherwise the oldest match
//!   wins and a warning is recorded.

use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use time::OffsetDateTime;

use gdrv_core::{AppError, AppResult, ErrorKind, Warning};

/// Default TTL for cached path mappings.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Alias accepted by the platform for the user's root folder.
pub const ROOT_ALIAS: &str = "root";

/// One child candidate returned by a lookup query.
#[derive(Clone, Debug)]
pub struct ChildCandidate {
    pub id: String,
    pub created_time: Option<OffsetDateTime>,
}

/// Remote child lookup contract, implemented by the files API wrapper.
pub trait ChildLookup {
    /// Returns untrashed children of `parent_id` named exactly `name`.
    fn find_children(
        &self,
        parent_id: &str,
        name: &str,
        drive_id: Option<&str>,
    ) -> impl Future<Output = AppResult<Vec<ChildCandidate>>> + Send;
}

#[derive(Clone, Debug)]
struct CacheEntry {
    id: String,
    inserted_at: Instant,
}

/// Concurrent path cache keyed by `(drive scope, normalized path)`.
#[derive(Debug)]
pub struct PathCache {
    entries: DashMap<(String, String), CacheEntry>,
    ttl: Duration,
}

impl PathCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached id for `path` unless the entry has expired.
    #[must_use]
    pub fn get(&self, scope: &str, path: &str) -> Option<String> {
        let key = (scope.to_owned(), path.to_owned());
        let entry = self.entries.get(&key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.id.clone())
    }

    pub fn insert(&self, scope: &str, path: &str, id: impl Into<String>) {
        self.entries.insert(
            (scope.to_owned(), path.to_owned()),
            CacheEntry {
                id: id.into(),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drops `path`, everything below it, and every ancestor mapping.
    ///
    /// Mutators call this before issuing the write so no stale mapping can
    /// be observed after the mutation lands.
    pub fn invalidate_for_mutation(&self, scope: &str, path: &str) {
        let normalized = path.trim_end_matches('/');
        self.entries.retain(|(entry_scope, entry_path), _| {
            if entry_scope != scope {
                return true;
            }
            let is_subtree = entry_path == normalized
                || entry_path.starts_with(&format!("{normalized}/"));
            let is_ancestor = normalized.starts_with(&format!("{entry_path}/"))
                || entry_path == "/";
            !(is_subtree || is_ancestor)
        });
    }

    /// Number of live entries; used by tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PathCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

/// Resolution request.
#[derive(Clone, Debug)]
pub struct ResolveRequest<'a> {
    pub input: &'a str,
    pub drive_id: Option<&'a str>,
    pub strict: bool,
    pub no_cache: bool,
}

/// Resolution outcome: the id plus an optional ambiguity warning.
#[derive(Clone, Debug)]
pub struct Resolved {
    pub id: String,
    pub warning: Option<Warning>,
}

/// Heuristic separating opaque ids from human paths.
///
/// Anything containing `/`, a space, or a dot is a path; everything else is
/// treated as an id only when it plausibly is one (long, id alphabet).
#[must_use]
pub fn looks_like_path(input: &str) -> bool {
    if input.contains('/') || input.contains(' ') || input.contains('.') {
        return true;
    }
    let id_like = input.len() >= 20
        && input
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    !id_like
}

/// Normalizes a path: requires a leading `/`, strips a trailing `/`, and
/// rejects `.` / `..` segments.
pub fn normalize_path(input: &str) -> AppResult<String> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return Err(AppError::new(
            ErrorKind::InvalidPath,
            format!("path '{trimmed}' must be absolute"),
        ));
    }
    let without_trailing = if trimmed.len() > 1 {
        trimmed.trim_end_matches('/')
    } else {
        trimmed
    };
    for segment in without_trailing.split('/').skip(1) {
        if segment == "." || segment == ".." {
            return Err(AppError::new(
                ErrorKind::InvalidPath,
                "'.' and '..' segments are not supported in remote paths",
            ));
        }
        if segment.is_empty() && without_trailing != "/" {
            return Err(AppError::new(
                ErrorKind::InvalidPath,
                format!("path '{trimmed}' contains an empty segment"),
            ));
        }
    }
    Ok(if without_trailing.is_empty() {
        String::from("/")
    } else {
        without_trailing.to_owned()
    })
}

/// Resolves `request.input` to a resource id.
///
/// Ids pass through untouched. Paths are resolved against the cache first
/// (unless `no_cache`), then by walking the remote tree one segment at a
/// time.
pub async fn resolve<L: ChildLookup>(
    lookup: &L,
    cache: &PathCache,
    request: ResolveRequest<'_>,
) -> AppResult<Resolved> {
    if !looks_like_path(request.input) {
        return Ok(Resolved {
            id: request.input.to_owned(),
            warning: None,
        });
    }

    let normalized = normalize_path(request.input)?;
    let scope = request.drive_id.unwrap_or("user").to_owned();
    let root_id = request.drive_id.map_or(ROOT_ALIAS, |id| id).to_owned();

    if normalized == "/" {
        return Ok(Resolved {
            id: root_id,
            warning: None,
        });
    }

    if !request.no_cache {
        if let Some(id) = cache.get(&scope, &normalized) {
            tracing::debug!(path = %normalized, %id, "path cache hit");
            return Ok(Resolved { id, warning: None });
        }
    }

    let mut parent = root_id;
    let mut warning = None;
    for segment in normalized.split('/').skip(1) {
        let mut candidates = lookup
            .find_children(&parent, segment, request.drive_id)
            .await?;
        match candidates.len() {
            0 => {
                return Err(AppError::new(
                    ErrorKind::InvalidPath,
                    format!("no item named '{segment}' under the requested parent"),
                )
                .with_context("path", normalized.clone())
                .with_context("segment", segment));
            }
            1 => parent = candidates.remove(0).id,
            _ => {
                if request.strict {
                    return Err(AppError::new(
                        ErrorKind::Ambiguous,
                        format!("'{segment}' matches {} items; pass an id or disable --strict", candidates.len()),
                    )
                    .with_context("path", normalized.clone())
                    .with_context(
                        "candidates",
                        serde_json::json!(candidates.iter().map(|c| c.id.clone()).collect::<Vec<_>>()),
                    ));
                }
                candidates.sort_by_key(|candidate| {
                    candidate.created_time.unwrap_or(OffsetDateTime::UNIX_EPOCH)
                });
                let chosen = candidates.remove(0);
                warning = Some(Warning::new(
                    "AMBIGUOUS_PATH",
                    format!("'{segment}' matched multiple items; using oldest {}", chosen.id),
                ));
                parent = chosen.id;
            }
        }
    }

    if !request.no_cache {
        cache.insert(&scope, &normalized, parent.clone());
    }
    Ok(Resolved {
        id: parent,
        warning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    struct FakeTree {
        // (parent, name) -> candidates
        children: HashMap<(String, String), Vec<ChildCandidate>>,
        queries: AtomicUsize,
    }

    impl FakeTree {
        fn new(entries: &[(&str, &str, &str, Option<OffsetDateTime>)]) -> Self {
            let mut children: HashMap<(String, String), Vec<ChildCandidate>> = HashMap::new();
            for (parent, name, id, created) in entries {
                children
                    .entry(((*parent).to_owned(), (*name).to_owned()))
                    .or_default()
                    .push(ChildCandidate {
                        id: (*id).to_owned(),
                        created_time: *created,
                    });
            }
            Self {
                children,
                queries: AtomicUsize::new(0),
            }
        }
    }

    impl ChildLookup for FakeTree {
        async fn find_children(
            &self,
            parent_id: &str,
            name: &str,
            _drive_id: Option<&str>,
        ) -> AppResult<Vec<ChildCandidate>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .children
                .get(&(parent_id.to_owned(), name.to_owned()))
                .cloned()
                .unwrap_or_default())
        }
    }

    #[test]
    fn path_heuristic_separates_ids_from_paths() {
        assert!(looks_like_path("/docs/report.txt"));
        assert!(looks_like_path("name with space"));
        assert!(looks_like_path("report.txt"));
        assert!(looks_like_path("short"));
        assert!(!looks_like_path("1aBcD2eFgH3iJkL4mNoP5qRsT"));
        assert!(!looks_like_path("0ABCdefGHIjklMNOpqrstuv_w-x"));
    }

    #[test]
    fn normalization_rules() {
        assert_eq!(normalize_path("/").expect("root"), "/");
        assert_eq!(normalize_path("/a/b/").expect("trailing"), "/a/b");
        assert!(normalize_path("relative/x").is_err());
        assert!(normalize_path("/a/../b").is_err());
        assert!(normalize_path("/a/./b").is_err());
        assert!(normalize_path("/a//b").is_err());
    }

    #[tokio::test]
    async fn resolves_nested_paths_by_walking_segments() {
        let tree = FakeTree::new(&[
            ("root", "docs", "id-docs", None),
            ("id-docs", "report.txt", "id-report", None),
        ]);
        let cache = PathCache::default();
        let resolved = resolve(
            &tree,
            &cache,
            ResolveRequest {
                input: "/docs/report.txt",
                drive_id: None,
                strict: true,
                no_cache: false,
            },
        )
        .await
        .expect("resolves");
        assert_eq!(resolved.id, "id-report");
        assert!(resolved.warning.is_none());
    }

    #[tokio::test]
    async fn root_resolves_without_any_queries() {
        let tree = FakeTree::new(&[]);
        let cache = PathCache::default();
        let resolved = resolve(
            &tree,
            &cache,
            ResolveRequest {
                input: "/",
                drive_id: None,
                strict: true,
                no_cache: false,
            },
        )
        .await
        .expect("root");
        assert_eq!(resolved.id, ROOT_ALIAS);
        assert_eq!(tree.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_segment_fails_fast_with_invalid_path() {
        let tree = FakeTree::new(&[("root", "docs", "id-docs", None)]);
        let cache = PathCache::default();
        let error = resolve(
            &tree,
            &cache,
            ResolveRequest {
                input: "/docs/ghost/deeper",
                drive_id: None,
                strict: true,
                no_cache: false,
            },
        )
        .await
        .expect_err("missing");
        assert_eq!(error.kind(), ErrorKind::InvalidPath);
        // Fail fast: the third segment is never queried.
        assert_eq!(tree.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ambiguity_errors_under_strict_and_warns_otherwise() {
        let older = datetime!(2024-01-01 00:00:00 UTC);
        let newer = datetime!(2025-01-01 00:00:00 UTC);
        let tree = FakeTree::new(&[
            ("root", "reports", "id-new", Some(newer)),
            ("root", "reports", "id-old", Some(older)),
        ]);
        let cache = PathCache::default();

        let error = resolve(
            &tree,
            &cache,
            ResolveRequest {
                input: "/reports",
                drive_id: None,
                strict: true,
                no_cache: false,
            },
        )
        .await
        .expect_err("ambiguous");
        assert_eq!(error.kind(), ErrorKind::Ambiguous);

        let resolved = resolve(
            &tree,
            &cache,
            ResolveRequest {
                input: "/reports",
                drive_id: None,
                strict: false,
                no_cache: false,
            },
        )
        .await
        .expect("oldest wins");
        assert_eq!(resolved.id, "id-old");
        let warning = resolved.warning.expect("warning recorded");
        assert!(warning.message.contains("id-old"));
    }

    #[tokio::test]
    async fn cache_hits_skip_the_walk_and_no_cache_bypasses() {
        let tree = FakeTree::new(&[("root", "docs", "id-docs", None)]);
        let cache = PathCache::default();
        let request = ResolveRequest {
            input: "/docs",
            drive_id: None,
            strict: true,
            no_cache: false,
        };

        resolve(&tree, &cache, request.clone()).await.expect("first");
        assert_eq!(tree.queries.load(Ordering::SeqCst), 1);
        resolve(&tree, &cache, request.clone()).await.expect("cached");
        assert_eq!(tree.queries.load(Ordering::SeqCst), 1, "second hit served from cache");

        let bypass = ResolveRequest {
            no_cache: true,
            ..request
        };
        resolve(&tree, &cache, bypass).await.expect("bypass");
        assert_eq!(tree.queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ttl_expiry_evicts_entries() {
        let tree = FakeTree::new(&[("root", "docs", "id-docs", None)]);
        let cache = PathCache::new(Duration::from_millis(0));
        resolve(
            &tree,
            &cache,
            ResolveRequest {
                input: "/docs",
                drive_id: None,
                strict: true,
                no_cache: false,
            },
        )
        .await
        .expect("first");
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("user", "/docs").is_none(), "expired entry evicted");
    }

    #[test]
    fn mutation_invalidation_clears_subtree_and_ancestors() {
        let cache = PathCache::default();
        cache.insert("user", "/a", "id-a");
        cache.insert("user", "/a/b", "id-b");
        cache.insert("user", "/a/b/c", "id-c");
        cache.insert("user", "/other", "id-other");
        cache.insert("drive1", "/a/b", "id-foreign");

        cache.invalidate_for_mutation("user", "/a/b");
        assert!(cache.get("user", "/a/b").is_none());
        assert!(cache.get("user", "/a/b/c").is_none());
        assert!(cache.get("user", "/a").is_none(), "ancestors invalidated");
        assert_eq!(cache.get("user", "/other").as_deref(), Some("id-other"));
        assert_eq!(cache.get("drive1", "/a/b").as_deref(), Some("id-foreign"));
    }
}
