//! `gdrv about` and `gdrv version`.

use serde_json::{json, Value};

use gdrv_core::{AppResult, RequestType};
use gdrv_drive::about::AboutApi;

use crate::context::CommandContext;

pub async fn run(cx: &mut CommandContext) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::GetById);
    let about = AboutApi::new(&api).get(&req_ctx).await?;
    Ok(serde_json::to_value(about)?)
}

/// Build information for `gdrv version`.
#[must_use]
pub fn version_payload() -> Value {
    json!({
        "name": "gdrv",
        "version": env!("CARGO_PKG_VERSION"),
        "schemaVersion": gdrv_core::SCHEMA_VERSION,
    })
}
