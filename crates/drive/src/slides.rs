//! Presentation operations.

use reqwest::Method;

use gdrv_core::{AppResult, RequestContext};

use crate::model::RemoteFile;
use crate::{escape_query_literal, files::FilesApi, ApiContext};

pub struct SlidesApi<'a> {
    ctx: &'a ApiContext,
}

impl<'a> SlidesApi<'a> {
    #[must_use]
    pub const fn new(ctx: &'a ApiContext) -> Self {
        Self { ctx }
    }

    pub async fn list(&self, req_ctx: &RequestContext) -> AppResult<Vec<RemoteFile>> {
        let query = format!(
            "mimeType = '{}' and trashed = false",
            escape_query_literal(crate::model::PRESENTATION_MIME_TYPE)
        );
        FilesApi::new(self.ctx).list(req_ctx, Some(&query), None, 100).await
    }

    pub async fn get(&self, req_ctx: &RequestContext, id: &str) -> AppResult<serde_json::Value> {
        let url = format!("{}/{id}", self.ctx.endpoints.slides);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .request(Method::GET, &url)
                    .query(&[("fields", "presentationId,title,revisionId,slides.objectId")])
            })
            .await
    }

    /// Reads the presentation's plain-text rendition via export.
    pub async fn read_text(&self, req_ctx: &RequestContext, id: &str) -> AppResult<String> {
        let url = format!("{}/files/{id}/export", self.ctx.endpoints.drive);
        let response = self
            .ctx
            .send_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .request(Method::GET, &url)
                    .query(&[("mimeType", "text/plain")])
            })
            .await?;
        response.text().await.map_err(|error| {
            gdrv_core::AppError::new(
                gdrv_core::ErrorKind::NetworkError,
                format!("export truncated: {error}"),
            )
        })
    }

    pub async fn create(
        &self,
        req_ctx: &RequestContext,
        title: &str,
    ) -> AppResult<serde_json::Value> {
        let body = serde_json::json!({ "title": title });
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .request(Method::POST, &self.ctx.endpoints.slides)
                    .json(&body)
            })
            .await
    }

    /// Applies an opaque batch-update body.
    pub async fn batch_update(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        body: &serde_json::Value,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}/{id}:batchUpdate", self.ctx.endpoints.slides);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.request(Method::POST, &url).json(body)
            })
            .await
    }

    /// Convenience wrapper for `replaceAllText`.
    pub async fn replace_all_text(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        find: &str,
        replace_with: &str,
    ) -> AppResult<serde_json::Value> {
        let body = serde_json::json!({
            "requests": [{
                "replaceAllText": {
                    "containsText": { "text": find, "matchCase": true },
                    "replaceText": replace_with,
                }
            }]
        });
        self.batch_update(req_ctx, id, &body).await
    }
}
