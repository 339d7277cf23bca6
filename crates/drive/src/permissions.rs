//! Permission management and reporting.

use reqwest::Method;

use gdrv_core::{AppResult, RequestContext};
use gdrv_transport::shape_request;

use crate::model::{Permission, PermissionList};
use crate::ApiContext;

pub struct PermissionsApi<'a> {
    ctx: &'a ApiContext,
}

impl<'a> PermissionsApi<'a> {
    #[must_use]
    pub const fn new(ctx: &'a ApiContext) -> Self {
        Self { ctx }
    }

    pub async fn list(&self, req_ctx: &RequestContext, file_id: &str) -> AppResult<Vec<Permission>> {
        let shape = shape_request(
            req_ctx,
            &self.ctx.resource_keys,
            Some("nextPageToken, permissions(id, type, role, emailAddress, domain, allowFileDiscovery, expirationTime)"),
            self.ctx.preset,
        );
        let url = format!("{}/files/{file_id}/permissions", self.ctx.endpoints.drive);
        let mut permissions = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let token = page_token.clone();
            let page: PermissionList = self
                .ctx
                .json_with_retry(req_ctx, false, || {
                    let mut builder = self.ctx.connection.shaped(Method::GET, &url, &shape);
                    if let Some(token) = &token {
                        builder = builder.query(&[("pageToken", token)]);
                    }
                    builder
                })
                .await?;
            permissions.extend(page.permissions);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => return Ok(permissions),
            }
        }
    }

    pub async fn create(
        &self,
        req_ctx: &RequestContext,
        file_id: &str,
        body: &serde_json::Value,
    ) -> AppResult<Permission> {
        let shape = shape_request(req_ctx, &self.ctx.resource_keys, None, self.ctx.preset);
        let url = format!("{}/files/{file_id}/permissions", self.ctx.endpoints.drive);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .shaped(Method::POST, &url, &shape)
                    .json(body)
            })
            .await
    }

    pub async fn update(
        &self,
        req_ctx: &RequestContext,
        file_id: &str,
        permission_id: &str,
        role: &str,
    ) -> AppResult<Permission> {
        let shape = shape_request(req_ctx, &self.ctx.resource_keys, None, self.ctx.preset);
        let url = format!(
            "{}/files/{file_id}/permissions/{permission_id}",
            self.ctx.endpoints.drive
        );
        let body = serde_json::json!({ "role": role });
        self.ctx
            .json_with_retry(req_ctx, true, || {
                self.ctx
                    .connection
                    .shaped(Method::PATCH, &url, &shape)
                    .json(&body)
            })
            .await
    }

    pub async fn remove(
        &self,
        req_ctx: &RequestContext,
        file_id: &str,
        permission_id: &str,
    ) -> AppResult<()> {
        let shape = shape_request(req_ctx, &self.ctx.resource_keys, Some("id"), self.ctx.preset);
        let url = format!(
            "{}/files/{file_id}/permissions/{permission_id}",
            self.ctx.endpoints.drive
        );
        self.ctx
            .send_with_retry(req_ctx, true, || {
                self.ctx.connection.shaped(Method::DELETE, &url, &shape)
            })
            .await?;
        Ok(())
    }

    /// Creates an `anyone` link permission with the given role.
    pub async fn create_link(
        &self,
        req_ctx: &RequestContext,
        file_id: &str,
        role: &str,
    ) -> AppResult<Permission> {
        let body = serde_json::json!({
            "type": "anyone",
            "role": role,
            "allowFileDiscovery": false,
        });
        self.create(req_ctx, file_id, &body).await
    }
}
