//! Spreadsheet operations.
//!
//! Batch-update bodies cross this boundary as opaque JSON validated only
//! for well-formedness; the core does not model every request variant.

use reqwest::Method;

use gdrv_core::{AppResult, RequestContext};

use crate::model::RemoteFile;
use crate::{escape_query_literal, files::FilesApi, ApiContext};

pub struct SheetsApi<'a> {
    ctx: &'a ApiContext,
}

impl<'a> SheetsApi<'a> {
    #[must_use]
    pub const fn new(ctx: &'a ApiContext) -> Self {
        Self { ctx }
    }

    /// Lists spreadsheets visible to the user.
    pub async fn list(&self, req_ctx: &RequestContext) -> AppResult<Vec<RemoteFile>> {
        let query = format!(
            "mimeType = '{}' and trashed = false",
            escape_query_literal(crate::model::SPREADSHEET_MIME_TYPE)
        );
        FilesApi::new(self.ctx).list(req_ctx, Some(&query), None, 100).await
    }

    /// Creates an empty spreadsheet.
    pub async fn create(
        &self,
        req_ctx: &RequestContext,
        title: &str,
    ) -> AppResult<serde_json::Value> {
        let body = serde_json::json!({ "properties": { "title": title } });
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .request(Method::POST, &self.ctx.endpoints.sheets)
                    .json(&body)
            })
            .await
    }

    /// Fetches spreadsheet metadata.
    pub async fn get(&self, req_ctx: &RequestContext, id: &str) -> AppResult<serde_json::Value> {
        let url = format!("{}/{id}", self.ctx.endpoints.sheets);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .request(Method::GET, &url)
                    .query(&[("fields", "spreadsheetId,properties,sheets.properties")])
            })
            .await
    }

    pub async fn values_get(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        range: &str,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}/{id}/values/{range}", self.ctx.endpoints.sheets);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.request(Method::GET, &url)
            })
            .await
    }

    pub async fn values_update(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        range: &str,
        values: &serde_json::Value,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}/{id}/values/{range}", self.ctx.endpoints.sheets);
        let body = serde_json::json!({ "range": range, "values": values });
        self.ctx
            .json_with_retry(req_ctx, true, || {
                self.ctx
                    .connection
                    .request(Method::PUT, &url)
                    .query(&[("valueInputOption", "USER_ENTERED")])
                    .json(&body)
            })
            .await
    }

    pub async fn values_append(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        range: &str,
        values: &serde_json::Value,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}/{id}/values/{range}:append", self.ctx.endpoints.sheets);
        let body = serde_json::json!({ "range": range, "values": values });
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .request(Method::POST, &url)
                    .query(&[("valueInputOption", "USER_ENTERED")])
                    .json(&body)
            })
            .await
    }

    pub async fn values_clear(
        &self,
        req_ctx: &RequestContext,
        id: &str,
        range: &str,
    ) -> AppResult<serde_json::Value> {
        let url = format!("{}/{id}/values/{range}:clear", self.ctx.endpoints.sheets);
        self.ctx
            .json_with_retry(req_ctx, true, || {
                self.ctx
                    .connection
                    .request(Method::POST, &url)
                    .json(&serde_json::json!({}))
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
        let url = format!("{}/{id}:batchUpdate", self.ctx.endpoints.sheets);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx.connection.request(Method::POST, &url).json(body)
            })
            .await
    }
}
