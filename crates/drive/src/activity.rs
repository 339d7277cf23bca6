//! Activity feed queries.

use reqwest::Method;

use gdrv_core::{AppResult, RequestContext};

use crate::ApiContext;

pub struct ActivityApi<'a> {
    ctx: &'a ApiContext,
}

impl<'a> ActivityApi<'a> {
    #[must_use]
    pub const fn new(ctx: &'a ApiContext) -> Self {
        Self { ctx }
    }

    /// Queries activity for one item or everything below a folder.
    pub async fn query(
        &self,
        req_ctx: &RequestContext,
        item_id: Option<&str>,
        folder_id: Option<&str>,
        page_size: u32,
    ) -> AppResult<serde_json::Value> {
        let mut body = serde_json::Map::new();
        body.insert(String::from("pageSize"), serde_json::json!(page_size));
        if let Some(item) = item_id {
            body.insert(
                String::from("itemName"),
                serde_json::json!(format!("items/{item}")),
            );
        }
        if let Some(folder) = folder_id {
            body.insert(
                String::from("ancestorName"),
                serde_json::json!(format!("items/{folder}")),
            );
        }
        let body = serde_json::Value::Object(body);
        self.ctx
            .json_with_retry(req_ctx, false, || {
                self.ctx
                    .connection
                    .request(Method::POST, &self.ctx.endpoints.activity)
                    .json(&body)
            })
            .await
    }
}
