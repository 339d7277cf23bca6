//! Change-feed access.

use reqwest::Method;

use gdrv_core::{AppResult, RequestContext};
use gdrv_transport::shape_request;

use crate::model::{ChangeList, StartPageToken};
use crate::ApiContext;

pub struct ChangesApi<'a> {
    ctx: &'a ApiContext,
}

impl<'a> ChangesApi<'a> {
    #[must_use]
    pub const fn new(ctx: &'a ApiContext) -> Self {
        Self { ctx }
    }

    /// Returns a token pointing at the current end of the feed.
    pub async fn start_page_token(&self, req_ctx: &RequestContext) -> AppResult<String> {
        let shape = shape_request(
            req_ctx,
            &self.ctx.resource_keys,
            Some("startPageToken"),
            self.ctx.preset,
        );
        let url = format!("{}/changes/startPageToken", self.ctx.endpoints.drive);
        let token: StartPageToken = self
            .ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.shaped(Method::GET, &url, &shape)
            })
            .await?;
        Ok(token.start_page_token)
    }

    /// Lists one page of changes from `token`.
    pub async fn list(&self, req_ctx: &RequestContext, token: &str) -> AppResult<ChangeList> {
        let shape = shape_request(
            req_ctx,
            &self.ctx.resource_keys,
            Some("nextPageToken, newStartPageToken, changes(fileId, removed, time, file(id, name, mimeType, modifiedTime, trashed))"),
            self.ctx.preset,
        );
        let url = format!("{}/changes", self.ctx.endpoints.drive);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .shaped(Method::GET, &url, &shape)
                    .query(&[("pageToken", token)])
            })
            .await
    }

    /// Stops a push notification channel.
    pub async fn stop(
        &self,
        req_ctx: &RequestContext,
        channel_id: &str,
        resource_id: &str,
    ) -> AppResult<()> {
        let url = format!("{}/channels/stop", self.ctx.endpoints.drive);
        let body = serde_json::json!({ "id": channel_id, "resourceId": resource_id });
        self.ctx
            .send_with_retry(req_ctx, true, || {
                self.ctx
                    .connection
                    .request(Method::POST, &url)
                    .json(&body)
            })
            .await?;
        Ok(())
    }
}
