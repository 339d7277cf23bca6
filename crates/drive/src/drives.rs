//! Shared-drive listing.

use reqwest::Method;

use gdrv_core::{AppResult, RequestContext};
use gdrv_transport::shape_request;

use crate::model::{DriveInfo, DriveList};
use crate::ApiContext;

pub struct DrivesApi<'a> {
    ctx: &'a ApiContext,
}

impl<'a> DrivesApi<'a> {
    #[must_use]
    pub const fn new(ctx: &'a ApiContext) -> Self {
        Self { ctx }
    }

    pub async fn list(&self, req_ctx: &RequestContext) -> AppResult<Vec<DriveInfo>> {
        let shape = shape_request(
            req_ctx,
            &self.ctx.resource_keys,
            Some("nextPageToken, drives(id, name, createdTime, hidden)"),
            self.ctx.preset,
        );
        let url = format!("{}/drives", self.ctx.endpoints.drive);
        let mut drives = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let token = page_token.clone();
            let page: DriveList = self
                .ctx
                .json_with_retry(req_ctx, false, || {
                    let mut builder = self.ctx.connection.shaped(Method::GET, &url, &shape);
                    if let Some(token) = &token {
                        builder = builder.query(&[("pageToken", token)]);
                    }
                    builder
                })
                .await?;
            drives.extend(page.drives);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => return Ok(drives),
            }
        }
    }

    pub async fn get(&self, req_ctx: &RequestContext, id: &str) -> AppResult<DriveInfo> {
        let shape = shape_request(
            req_ctx,
            &self.ctx.resource_keys,
            Some("id, name, createdTime, hidden"),
            self.ctx.preset,
        );
        let url = format!("{}/drives/{id}", self.ctx.endpoints.drive);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.shaped(Method::GET, &url, &shape)
            })
            .await
    }
}
