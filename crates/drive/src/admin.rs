//! Directory administration (users and groups).
//!
//! Create/update bodies pass through as opaque JSON; the admin API's
//! resource shapes are too broad to model here.

use reqwest::Method;

use gdrv_core::{AppResult, RequestContext};

use crate::ApiContext;

pub struct AdminApi<'a> {
    ctx: &'a ApiContext,
}

impl<'a> AdminApi<'a> {
    #[must_use]
    pub const fn new(ctx: &'a ApiContext) -> Self {
        Self { ctx }
    }

    pub async fn users_list(
        &self,
        req_ctx: &RequestContext,
        domain: Option<&str>,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}/users", self.ctx.endpoints.admin);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                let mut builder = self.ctx.connection.request(Method::GET, &url);
                builder = match domain {
                    Some(domain) => builder.query(&[("domain", domain)]),
                    None => builder.query(&[("customer", "my_customer")]),
                };
                builder.query(&[("maxResults", "100")])
            })
            .await
    }

    pub async fn users_get(
        &self,
        req_ctx: &RequestContext,
        user_key: &str,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}/users/{user_key}", self.ctx.endpoints.admin);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.request(Method::GET, &url)
            })
            .await
    }

    pub async fn users_create(
        &self,
        req_ctx: &RequestContext,
        body: &serde_json::Value,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}/users", self.ctx.endpoints.admin);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.request(Method::POST, &url).json(body)
            })
            .await
    }

    pub async fn users_update(
        &self,
        req_ctx: &RequestContext,
        user_key: &str,
        body: &serde_json::Value,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}/users/{user_key}", self.ctx.endpoints.admin);
        self.ctx
            .json_with_retry(req_ctx, true, || {
                self.ctx.connection.request(Method::PUT, &url).json(body)
            })
            .await
    }

    pub async fn users_delete(&self, req_ctx: &RequestContext, user_key: &str) -> AppResult<()> {
        let url = format!("{}/users/{user_key}", self.ctx.endpoints.admin);
        self.ctx
            .send_with_retry(req_ctx, true, || {
                self.ctx.connection.request(Method::DELETE, &url)
            })
            .await?;
        Ok(())
    }

    pub async fn groups_list(
        &self,
        req_ctx: &RequestContext,
        domain: Option<&str>,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}/groups", self.ctx.endpoints.admin);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                let builder = self.ctx.connection.request(Method::GET, &url);
                match domain {
                    Some(domain) => builder.query(&[("domain", domain)]),
                    None => builder.query(&[("customer", "my_customer")]),
                }
            })
            .await
    }

    pub async fn groups_get(
        &self,
        req_ctx: &RequestContext,
        group_key: &str,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}/groups/{group_key}", self.ctx.endpoints.admin);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.request(Method::GET, &url)
            })
            .await
    }

    pub async fn groups_create(
        &self,
        req_ctx: &RequestContext,
        body: &serde_json::Value,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}/groups", self.ctx.endpoints.admin);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.request(Method::POST, &url).json(body)
            })
            .await
    }

    pub async fn groups_delete(&self, req_ctx: &RequestContext, group_key: &str) -> AppResult<()> {
        let url = format!("{}/groups/{group_key}", self.ctx.endpoints.admin);
        self.ctx
            .send_with_retry(req_ctx, true, || {
                self.ctx.connection.request(Method::DELETE, &url)
            })
            .await?;
        Ok(())
    }
}
