//! Files manager: listing, transfer, and mutation of file resources.

use std::path::Path;

use reqwest::Method;

use gdrv_core::{AppError, AppResult, ErrorKind, RequestContext};
use gdrv_transport::{operation_url, poll_until_ready, shape_request, PollConfig, PollStatus};

use crate::model::{FileList, RemoteFile, RevisionList, FOLDER_MIME_TYPE};
use crate::{escape_query_literal, ApiContext};

/// Export requests larger than this are rejected remotely.
pub const EXPORT_SIZE_LIMIT_BYTES: u64 = 10 * 1024 * 1024;

const MULTIPART_BOUNDARY: &str = "gdrv-multipart-boundary";

/// Files API wrapper.
pub struct FilesApi<'a> {
    ctx: &'a ApiContext,
}

impl<'a> FilesApi<'a> {
    #[must_use]
    pub const fn new(ctx: &'a ApiContext) -> Self {
        Self { ctx }
    }

    /// Lists files matching `query`, following pagination to the end.
    pub async fn list(
        &self,
        req_ctx: &RequestContext,
        query: Option<&str>,
        fields: Option<&str>,
        page_size: u32,
    ) -> AppResult<Vec<RemoteFile>> {
        let shape = shape_request(req_ctx, &self.ctx.resource_keys, fields, self.ctx.preset);
        let url = format!("{}/files", self.ctx.endpoints.drive);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let token = page_token.clone();
            let page: FileList = self
                .ctx
                .json_with_retry(req_ctx, false, || {
                    let mut builder = self
                        .ctx
                        .connection
                        .shaped(Method::GET, &url, &shape)
                        .query(&[("pageSize", page_size.to_string())]);
                    if let Some(q) = query {
                        builder = builder.query(&[("q", q)]);
                    }
                    if let Some(token) = &token {
                        builder = builder.query(&[("pageToken", token)]);
                    }
                    builder
                })
                .await?;
            for file in &page.files {
                self.ctx.remember_resource_key(file);
            }
            files.extend(page.files);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => {
                    tracing::debug!(count = files.len(), "file listing complete");
                    return Ok(files);
                }
            }
        }
    }

    /// Fetches one file's metadata.
    pub async fn get(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        fields: Option<&str>,
    ) -> AppResult<RemoteFile> {
        let shape = shape_request(req_ctx, &self.ctx.resource_keys, fields, self.ctx.preset);
        let url = format!("{}/files/{id}", self.ctx.endpoints.drive);
        let file: RemoteFile = self
            .ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.shaped(Method::GET, &url, &shape)
            })
            .await?;
        self.ctx.remember_resource_key(&file);
        Ok(file)
    }

    /// Lists untrashed children of `parent_id` with an exact name.
    pub async fn children_named(
        &self,
        req_ctx: &RequestContext,
        parent_id: &str,
        name: &str,
    ) -> AppResult<Vec<RemoteFile>> {
        let query = format!(
            "'{}' in parents and name = '{}' and trashed = false",
            escape_query_literal(parent_id),
            escape_query_literal(name)
        );
        self.list(
            req_ctx,
            Some(&query),
            Some("nextPageToken, files(id, name, mimeType, createdTime, resourceKey)"),
            100,
        )
        .await
    }

    /// Lists everything directly under `parent_id`.
    pub async fn children(
        &self,
        req_ctx: &RequestContext,
        parent_id: &str,
    ) -> AppResult<Vec<RemoteFile>> {
        let query = format!(
            "'{}' in parents and trashed = false",
            escape_query_literal(parent_id)
        );
        self.list(req_ctx, Some(&query), None, 1000).await
    }

    /// Creates an empty folder under `parent_id`.
    pub async fn create_folder(
        &self,
        req_ctx: &RequestContext,
        name: &str,
        parent_id: &str,
    ) -> AppResult<RemoteFile> {
        let shape = shape_request(req_ctx, &self.ctx.resource_keys, None, self.ctx.preset);
        let url = format!("{}/files", self.ctx.endpoints.drive);
        let body = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .shaped(Method::POST, &url, &shape)
                    .json(&body)
            })
            .await
    }

    /// Uploads `local_path`, creating a new file or updating `existing_id`.
    ///
    /// Uses a `multipart/related` body carrying the metadata JSON and the
    /// raw content in one request.
    pub async fn upload(
        &self,
        req_ctx: &RequestContext,
        local_path: &Path,
        name: &str,
        parent_id: Option<&str>,
        existing_id: Option<&str>,
    ) -> AppResult<RemoteFile> {
        let content = std::fs::read(local_path).map_err(|error| {
            AppError::new(
                ErrorKind::InvalidArgument,
                format!("cannot read {}: {error}", local_path.display()),
            )
        })?;
        let metadata = existing_id.map_or_else(
            || {
                let mut meta = serde_json::json!({ "name": name });
                if let Some(parent) = parent_id {
                    meta["parents"] = serde_json::json!([parent]);
                }
                meta
            },
            |_| serde_json::json!({ "name": name }),
        );
        let (body, content_type) = multipart_related(&metadata, &content)?;

        let shape = shape_request(req_ctx, &self.ctx.resource_keys, None, self.ctx.preset);
        let (method, url) = existing_id.map_or_else(
            || (Method::POST, format!("{}/files", self.ctx.endpoints.upload)),
            |id| (Method::PATCH, format!("{}/files/{id}", self.ctx.endpoints.upload)),
        );
        // Updates are idempotent; creates must not be replayed.
        let idempotent = existing_id.is_some();
        self.ctx
            .json_with_retry(req_ctx, idempotent, || {
                self.ctx
                    .connection
                    .shaped(method.clone(), &url, &shape)
                    .query(&[("uploadType", "multipart")])
                    .header(reqwest::header::CONTENT_TYPE, content_type.clone())
                    .body(body.clone())
            })
            .await
    }

    /// Downloads a file's content to `dest`.
    pub async fn download(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        dest: &Path,
    ) -> AppResult<()> {
        let shape = shape_request(req_ctx, &self.ctx.resource_keys, Some("id"), self.ctx.preset);
        let url = format!("{}/files/{id}", self.ctx.endpoints.drive);
        let response = self
            .ctx
            .send_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .shaped(Method::GET, &url, &shape)
                    .query(&[("alt", "media")])
            })
            .await?;
        let bytes = response.bytes().await.map_err(|error| {
            AppError::new(ErrorKind::NetworkError, format!("download truncated: {error}"))
        })?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, &bytes)?;
        Ok(())
    }

    /// Exports a native document to `mime_type`, writing the payload to
    /// `dest`. A 202 response switches to operation polling.
    pub async fn export(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        mime_type: &str,
        dest: &Path,
    ) -> AppResult<()> {
        let shape = shape_request(req_ctx, &self.ctx.resource_keys, Some("id"), self.ctx.preset);
        let url = format!("{}/files/{id}/export", self.ctx.endpoints.drive);
        let outcome = self
            .ctx
            .send_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .shaped(Method::GET, &url, &shape)
                    .query(&[("mimeType", mime_type)])
            })
            .await;

        let response = match outcome {
            Ok(response) => response,
            Err(error) if error.kind() == ErrorKind::ExportSizeLimit => {
                // Give the operator the per-format links as a way out.
                return Err(self.attach_export_links(req_ctx, id, error).await);
            }
            Err(error) => return Err(error),
        };

        let bytes = if response.status() == reqwest::StatusCode::ACCEPTED {
            let operation = operation_url(response.headers()).ok_or_else(|| {
                AppError::new(ErrorKind::Unknown, "202 response without an operation URL")
            })?;
            let download_url = poll_until_ready(PollConfig::default(), &self.ctx.cancel, || {
                self.check_operation(req_ctx, operation.clone())
            })
            .await?;
            let download = self
                .ctx
                .send_with_retry(req_ctx, false, || {
                    self.ctx.connection.request(Method::GET, &download_url)
                })
                .await?;
            download.bytes().await.map_err(|error| {
                AppError::new(ErrorKind::NetworkError, format!("export truncated: {error}"))
            })?
        } else {
            response.bytes().await.map_err(|error| {
                AppError::new(ErrorKind::NetworkError, format!("export truncated: {error}"))
            })?
        };

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, &bytes)?;
        Ok(())
    }

    async fn check_operation(
        &self,
        req_ctx: &RequestContext,
        operation: String,
    ) -> AppResult<PollStatus> {
        let response = self
            .ctx
            .send_with_retry(req_ctx, false, || {
                self.ctx.connection.request(Method::GET, &operation)
            })
            .await?;
        if response.status() == reqwest::StatusCode::ACCEPTED {
            return Ok(PollStatus::Pending);
        }
        let body: serde_json::Value = response.json().await.map_err(|error| {
            AppError::new(ErrorKind::Unknown, format!("malformed operation status: {error}"))
        })?;
        if body.get("done").and_then(serde_json::Value::as_bool) == Some(false) {
            return Ok(PollStatus::Pending);
        }
        body.pointer("/response/downloadUri")
            .and_then(serde_json::Value::as_str)
            .map(|uri| PollStatus::Ready(uri.to_owned()))
            .ok_or_else(|| {
                AppError::new(ErrorKind::Unknown, "operation finished without a download URL")
            })
    }

    async fn attach_export_links(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        error: AppError,
    ) -> AppError {
        match self.get(req_ctx, id, Some("id, exportLinks")).await {
            Ok(file) => match file.export_links {
                Some(links) => error.with_context("exportLinks", serde_json::Value::Object(links)),
                None => error,
            },
            Err(_) => error,
        }
    }

    /// Permanently deletes a file.
    pub async fn delete(&self, req_ctx: &RequestContext, id: &str) -> AppResult<()> {
        let shape = shape_request(req_ctx, &self.ctx.resource_keys, Some("id"), self.ctx.preset);
        let url = format!("{}/files/{id}", self.ctx.endpoints.drive);
        // Delete-by-id is idempotent.
        self.ctx
            .send_with_retry(req_ctx, true, || {
                self.ctx.connection.shaped(Method::DELETE, &url, &shape)
            })
            .await?;
        Ok(())
    }

    /// Moves a file to the trash.
    pub async fn trash(&self, req_ctx: &RequestContext, id: &str) -> AppResult<RemoteFile> {
        self.patch(req_ctx, id, &serde_json::json!({"trashed": true})).await
    }

    /// Restores a file from the trash.
    pub async fn restore(&self, req_ctx: &RequestContext, id: &str) -> AppResult<RemoteFile> {
        self.patch(req_ctx, id, &serde_json::json!({"trashed": false})).await
    }

    /// Renames a file.
    pub async fn rename(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        new_name: &str,
    ) -> AppResult<RemoteFile> {
        self.patch(req_ctx, id, &serde_json::json!({"name": new_name})).await
    }

    /// Applies a metadata patch; update semantics are idempotent.
    pub async fn patch(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        body: &serde_json::Value,
    ) -> AppResult<RemoteFile> {
        let shape = shape_request(req_ctx, &self.ctx.resource_keys, None, self.ctx.preset);
        let url = format!("{}/files/{id}", self.ctx.endpoints.drive);
        self.ctx
            .json_with_retry(req_ctx, true, || {
                self.ctx
                    .connection
                    .shaped(Method::PATCH, &url, &shape)
                    .json(body)
            })
            .await
    }

    /// Moves a file between parents.
    pub async fn move_file(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        add_parent: &str,
        remove_parent: Option<&str>,
    ) -> AppResult<RemoteFile> {
        let shape = shape_request(req_ctx, &self.ctx.resource_keys, None, self.ctx.preset);
        let url = format!("{}/files/{id}", self.ctx.endpoints.drive);
        self.ctx
            .json_with_retry(req_ctx, true, || {
                let mut builder = self
                    .ctx
                    .connection
                    .shaped(Method::PATCH, &url, &shape)
                    .query(&[("addParents", add_parent)])
                    .json(&serde_json::json!({}));
                if let Some(remove) = remove_parent {
                    builder = builder.query(&[("removeParents", remove)]);
                }
                builder
            })
            .await
    }

    /// Copies a file, optionally renaming it and placing it elsewhere.
    pub async fn copy(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        new_name: Option<&str>,
        parent_id: Option<&str>,
    ) -> AppResult<RemoteFile> {
        let shape = shape_request(req_ctx, &self.ctx.resource_keys, None, self.ctx.preset);
        let url = format!("{}/files/{id}/copy", self.ctx.endpoints.drive);
        let mut body = serde_json::Map::new();
        if let Some(name) = new_name {
            body.insert(String::from("name"), serde_json::json!(name));
        }
        if let Some(parent) = parent_id {
            body.insert(String::from("parents"), serde_json::json!([parent]));
        }
        let body = serde_json::Value::Object(body);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .shaped(Method::POST, &url, &shape)
                    .json(&body)
            })
            .await
    }

    /// Lists the revisions of a file.
    pub async fn revisions(
        &self,
        req_ctx: &RequestContext,
        id: &str,
    ) -> AppResult<RevisionList> {
        let shape = shape_request(
            req_ctx,
            &self.ctx.resource_keys,
            Some("revisions(id, modifiedTime, size, md5Checksum, keepForever)"),
            self.ctx.preset,
        );
        let url = format!("{}/files/{id}/revisions", self.ctx.endpoints.drive);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.shaped(Method::GET, &url, &shape)
            })
            .await
    }

    /// Lists trashed files.
    pub async fn list_trashed(&self, req_ctx: &RequestContext) -> AppResult<Vec<RemoteFile>> {
        self.list(req_ctx, Some("trashed = true"), None, 100).await
    }
}

/// Builds a `multipart/related` body from metadata JSON and raw content.
pub(crate) fn multipart_related(
    metadata: &serde_json::Value,
    content: &[u8],
) -> AppResult<(Vec<u8>, String)> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(serde_json::to_string(metadata)?.as_bytes());
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    Ok((
        body,
        format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_body_contains_both_parts_and_final_boundary() {
        let metadata = serde_json::json!({"name": "a.txt"});
        let (body, content_type) = multipart_related(&metadata, b"payload").expect("body");
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("application/json"));
        assert!(text.contains("\"name\":\"a.txt\""));
        assert!(text.contains("payload"));
        assert!(text.ends_with(&format!("--{MULTIPART_BOUNDARY}--\r\n")));
        assert!(content_type.contains("multipart/related"));
    }

    #[test]
    fn child_queries_escape_untrusted_names() {
        let query = format!(
            "'{}' in parents and name = '{}' and trashed = false",
            escape_query_literal("parent'); drop"),
            escape_query_literal("it's a file")
        );
        assert!(query.contains("parent\\'); drop"));
        assert!(query.contains("it\\'s a file"));
    }
}
