//! Drive labels.

use reqwest::Method;

use gdrv_core::{AppResult, RequestContext};

use crate::ApiContext;

pub struct LabelsApi<'a> {
    ctx: &'a ApiContext,
}

impl<'a> LabelsApi<'a> {
    #[must_use]
    pub const fn new(ctx: &'a ApiContext) -> Self {
        Self { ctx }
    }

    pub async fn list(&self, req_ctx: &RequestContext) -> AppResult<serde_json::Value> {
        let url = format!("{}/labels", self.ctx.endpoints.labels);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .request(Method::GET, &url)
                    .query(&[("view", "LABEL_VIEW_FULL")])
            })
            .await
    }

    pub async fn get(&self, req_ctx: &RequestContext, label_id: &str) -> AppResult<serde_json::Value> {
        let url = format!("{}/labels/{label_id}", self.ctx.endpoints.labels);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.request(Method::GET, &url)
            })
            .await
    }
}
