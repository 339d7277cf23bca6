//! Account, quota, and export-format information.

use reqwest::Method;

use gdrv_core::{AppResult, RequestContext};
use gdrv_transport::shape_request;

use crate::model::About;
use crate::ApiContext;

pub struct AboutApi<'a> {
    ctx: &'a ApiContext,
}

impl<'a> AboutApi<'a> {
    #[must_use]
    pub const fn new(ctx: &'a ApiContext) -> Self {
        Self { ctx }
    }

    pub async fn get(&self, req_ctx: &RequestContext) -> AppResult<About> {
        let shape = shape_request(
            req_ctx,
            &self.ctx.resource_keys,
            Some("user(displayName, emailAddress), storageQuota"),
            self.ctx.preset,
        );
        let url = format!("{}/about", self.ctx.endpoints.drive);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.shaped(Method::GET, &url, &shape)
            })
            .await
    }

    /// Returns the per-MIME-type export format table.
    pub async fn export_formats(
        &self,
        req_ctx: &RequestContext,
    ) -> AppResult<serde_json::Value> {
        let shape = shape_request(
            req_ctx,
            &self.ctx.resource_keys,
            Some("exportFormats"),
            self.ctx.preset,
        );
        let url = format!("{}/about", self.ctx.endpoints.drive);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.shaped(Method::GET, &url, &shape)
            })
            .await
    }
}
