//! Adapters binding the files API to the sync-engine and resolver
//! contracts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use uuid::Uuid;

use gdrv_core::{AppResult, RequestContext, RequestType};
use gdrv_engine::{ChangeBatch, RemoteChange, RemoteFileState, RemoteTree, TransferOps};
use gdrv_transport::{ChildCandidate, ChildLookup};

use crate::files::FilesApi;
use crate::model::{Change, ChangeList, RemoteFile, StartPageToken};
use crate::ApiContext;

/// Files-API view of the remote for one sync run.
pub struct SyncOps {
    ctx: Arc<ApiContext>,
    profile: String,
    trace_id: Uuid,
    drive_id: Option<String>,
    /// Remote folder ids already ensured, keyed by relative directory.
    folder_cache: Mutex<HashMap<String, String>>,
}

impl SyncOps {
    #[must_use]
    pub fn new(
        ctx: Arc<ApiContext>,
        profile: impl Into<String>,
        trace_id: Uuid,
        drive_id: Option<String>,
        remote_root_id: impl Into<String>,
    ) -> Self {
        let root = remote_root_id.into();
        let folder_cache = Mutex::new(HashMap::from([(String::new(), root)]));
        Self {
            ctx,
            profile: profile.into(),
            trace_id,
            drive_id,
            folder_cache,
        }
    }

    fn req_ctx(&self, request_type: RequestType) -> RequestContext {
        let ctx = RequestContext::with_trace_id(&self.profile, request_type, self.trace_id);
        match &self.drive_id {
            Some(drive_id) => ctx.with_drive_id(drive_id.clone()),
            None => ctx,
        }
    }

    fn root_id(&self) -> String {
        self.folder_cache.lock().expect("folder cache poisoned")[""].clone()
    }

    fn state_from(file: &RemoteFile, rel_path: String) -> RemoteFileState {
        RemoteFileState {
            rel_path,
            id: file.id.clone(),
            size: file.size_bytes(),
            md5: file.md5_checksum.clone(),
            mtime: file.mtime_unix(),
            revision: file.head_revision_id.clone(),
        }
    }

    /// Finds or creates the remote folder for `rel_dir` (may be empty).
    async fn ensure_folder(&self, rel_dir: &str) -> AppResult<String> {
        if let Some(id) = self
            .folder_cache
            .lock()
            .expect("folder cache poisoned")
            .get(rel_dir)
        {
            return Ok(id.clone());
        }
        let (parent_dir, name) = rel_dir
            .rfind('/')
            .map_or(("", rel_dir), |idx| (&rel_dir[..idx], &rel_dir[idx + 1..]));
        let parent_id = Box::pin(self.ensure_folder(parent_dir)).await?;

        let api = FilesApi::new(&self.ctx);
        let req_ctx = self.req_ctx(RequestType::ListOrSearch);
        let found = api
            .children_named(&req_ctx, &parent_id, name)
            .await?
            .into_iter()
            .find(RemoteFile::is_folder);
        let id = match found {
            Some(folder) => folder.id,
            None => {
                let req_ctx = self.req_ctx(RequestType::Mutation);
                api.create_folder(&req_ctx, name, &parent_id).await?.id
            }
        };
        self.folder_cache
            .lock()
            .expect("folder cache poisoned")
            .insert(rel_dir.to_owned(), id.clone());
        Ok(id)
    }

    /// Computes the `/`-joined path of `file` relative to the sync root.
    ///
    /// Returns `None` when the file is not under the root. `memo` caches
    /// folder paths across one change batch.
    async fn rel_path_of(
        &self,
        file: &RemoteFile,
        memo: &mut HashMap<String, Option<String>>,
    ) -> AppResult<Option<String>> {
        let root = self.root_id();
        let Some(parent) = file.parents.as_ref().and_then(|parents| parents.first()) else {
            return Ok(None);
        };
        let parent_path = self.folder_path(parent, &root, memo).await?;
        Ok(parent_path.map(|prefix| {
            if prefix.is_empty() {
                file.name.clone()
            } else {
                format!("{prefix}/{}", file.name)
            }
        }))
    }

    async fn folder_path(
        &self,
        folder_id: &str,
        root: &str,
        memo: &mut HashMap<String, Option<String>>,
    ) -> AppResult<Option<String>> {
        if folder_id == root {
            return Ok(Some(String::new()));
        }
        if let Some(known) = memo.get(folder_id) {
            return Ok(known.clone());
        }
        let api = FilesApi::new(&self.ctx);
        let req_ctx = self.req_ctx(RequestType::GetById);
        let folder = api
            .get(&req_ctx, folder_id, Some("id, name, parents"))
            .await?;
        let result = match folder.parents.as_ref().and_then(|parents| parents.first()) {
            None => None,
            Some(parent) => Box::pin(self.folder_path(parent, root, memo))
                .await?
                .map(|prefix| {
                    if prefix.is_empty() {
                        folder.name.clone()
                    } else {
                        format!("{prefix}/{}", folder.name)
                    }
                }),
        };
        memo.insert(folder_id.to_owned(), result.clone());
        Ok(result)
    }
}

impl RemoteTree for SyncOps {
    async fn walk(&self, root_id: &str) -> AppResult<Vec<RemoteFileState>> {
        let api = FilesApi::new(&self.ctx);
        let mut states = Vec::new();
        let mut queue = vec![(root_id.to_owned(), String::new())];
        while let Some((folder_id, prefix)) = queue.pop() {
            let req_ctx = self.req_ctx(RequestType::ListOrSearch);
            for child in api.children(&req_ctx, &folder_id).await? {
                let rel_path = if prefix.is_empty() {
                    child.name.clone()
                } else {
                    format!("{prefix}/{}", child.name)
                };
                if child.is_folder() {
                    queue.push((child.id.clone(), rel_path));
                } else {
                    states.push(Self::state_from(&child, rel_path));
                }
            }
        }
        Ok(states)
    }

    async fn changes_since(&self, _root_id: &str, token: &str) -> AppResult<ChangeBatch> {
        let url = format!("{}/changes", self.ctx.endpoints.drive);
        let req_ctx = self.req_ctx(RequestType::ListOrSearch);
        let shape = gdrv_transport::shape_request(
            &req_ctx,
            &self.ctx.resource_keys,
            Some("nextPageToken, newStartPageToken, changes(fileId, removed, time, file(id, name, mimeType, size, modifiedTime, parents, md5Checksum, trashed, headRevisionId))"),
            self.ctx.preset,
        );

        let mut raw_changes: Vec<Change> = Vec::new();
        let mut page_token = token.to_owned();
        let new_start_token = loop {
            let current = page_token.clone();
            let page: ChangeList = self
                .ctx
                .json_with_retry(&req_ctx, false, || {
                    self.ctx
                        .connection
                        .shaped(reqwest::Method::GET, &url, &shape)
                        .query(&[("pageToken", current.clone())])
                })
                .await?;
            raw_changes.extend(page.changes);
            if let Some(next) = page.next_page_token {
                page_token = next;
            } else {
                break page.new_start_page_token.unwrap_or(page_token);
            }
        };

        let mut memo = HashMap::new();
        let mut changes = Vec::with_capacity(raw_changes.len());
        for change in raw_changes {
            let removed = change.removed
                || change
                    .file
                    .as_ref()
                    .and_then(|file| file.trashed)
                    .unwrap_or(false);
            if removed {
                changes.push(RemoteChange {
                    file_id: change.file_id,
                    removed: true,
                    state: None,
                });
                continue;
            }
            let Some(file) = change.file else { continue };
            if file.is_folder() {
                continue;
            }
            // Changes outside the configured subtree are dropped here so
            // the engine only ever sees its own pair.
            if let Some(rel_path) = self.rel_path_of(&file, &mut memo).await? {
                changes.push(RemoteChange {
                    file_id: file.id.clone(),
                    removed: false,
                    state: Some(Self::state_from(&file, rel_path)),
                });
            }
        }
        Ok(ChangeBatch {
            changes,
            new_start_token,
        })
    }

    async fn start_token(&self) -> AppResult<String> {
        let url = format!("{}/changes/startPageToken", self.ctx.endpoints.drive);
        let req_ctx = self.req_ctx(RequestType::GetById);
        let shape = gdrv_transport::shape_request(
            &req_ctx,
            &self.ctx.resource_keys,
            Some("startPageToken"),
            self.ctx.preset,
        );
        let token: StartPageToken = self
            .ctx
            .json_with_retry(&req_ctx, false, || {
                self.ctx
                    .connection
                    .shaped(reqwest::Method::GET, &url, &shape)
            })
            .await?;
        Ok(token.start_page_token)
    }
}

impl TransferOps for SyncOps {
    async fn upload(
        &self,
        local_path: &Path,
        target_rel_path: &str,
        existing_id: Option<&str>,
    ) -> AppResult<RemoteFileState> {
        let (dir, name) = target_rel_path
            .rfind('/')
            .map_or(("", target_rel_path), |idx| {
                (&target_rel_path[..idx], &target_rel_path[idx + 1..])
            });
        let parent_id = self.ensure_folder(dir).await?;
        let api = FilesApi::new(&self.ctx);
        let req_ctx = self.req_ctx(RequestType::Mutation);
        let file = api
            .upload(&req_ctx, local_path, name, Some(&parent_id), existing_id)
            .await?;
        Ok(Self::state_from(&file, target_rel_path.to_owned()))
    }

    async fn download(&self, remote_id: &str, target_path: &Path) -> AppResult<RemoteFileState> {
        let api = FilesApi::new(&self.ctx);
        let meta_ctx = self.req_ctx(RequestType::GetById);
        let file = api
            .get(
                &meta_ctx,
                remote_id,
                Some("id, name, size, modifiedTime, md5Checksum, headRevisionId"),
            )
            .await?;
        let req_ctx = self.req_ctx(RequestType::DownloadOrExport);
        api.download(&req_ctx, remote_id, target_path).await?;
        Ok(Self::state_from(&file, file.name.clone()))
    }

    async fn rename_remote(&self, remote_id: &str, new_name: &str) -> AppResult<RemoteFileState> {
        let api = FilesApi::new(&self.ctx);
        let req_ctx = self.req_ctx(RequestType::Mutation);
        let file = api.rename(&req_ctx, remote_id, new_name).await?;
        Ok(Self::state_from(&file, file.name.clone()))
    }

    async fn delete_remote(&self, remote_id: &str) -> AppResult<()> {
        let api = FilesApi::new(&self.ctx);
        let req_ctx = self.req_ctx(RequestType::Mutation);
        api.trash(&req_ctx, remote_id).await?;
        Ok(())
    }
}

/// Resolver adapter answering child queries through the files API.
pub struct PathLookup<'a> {
    ctx: &'a ApiContext,
    req_ctx: &'a RequestContext,
}

impl<'a> PathLookup<'a> {
    #[must_use]
    pub const fn new(ctx: &'a ApiContext, req_ctx: &'a RequestContext) -> Self {
        Self { ctx, req_ctx }
    }
}

impl ChildLookup for PathLookup<'_> {
    async fn find_children(
        &self,
        parent_id: &str,
        name: &str,
        _drive_id: Option<&str>,
    ) -> AppResult<Vec<ChildCandidate>> {
        let api = FilesApi::new(self.ctx);
        let children = api.children_named(self.req_ctx, parent_id, name).await?;
        Ok(children
            .into_iter()
            .map(|file| ChildCandidate {
                created_time: file.created_time.as_deref().and_then(|raw| {
                    time::OffsetDateTime::parse(
                        raw,
                        &time::format_description::well_known::Rfc3339,
                    )
                    .ok()
                }),
                id: file.id,
            })
            .collect())
    }
}
