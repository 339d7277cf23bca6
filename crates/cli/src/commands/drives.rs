//! `gdrv drives ...` handlers.

use clap::ArgMatches;
use serde_json::{json, Value};

use gdrv_core::{AppResult, RequestType};
use gdrv_drive::drives::DrivesApi;

use super::{required, unknown};
use crate::context::CommandContext;

pub async fn dispatch(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("drives", "");
    };
    let name = format!("drives.{verb}");
    let result = match verb {
        "list" => list(cx).await,
        "get" => get(cx, sub).await,
        other => return unknown("drives", other),
    };
    (name, result)
}

async fn list(cx: &mut CommandContext) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let drives = DrivesApi::new(&api).list(&req_ctx).await?;
    let count = drives.len();
    Ok(json!({ "drives": drives, "count": count }))
}

async fn get(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::GetById);
    let drive = DrivesApi::new(&api)
        .get(&req_ctx, required(matches, "drive")?)
        .await?;
    Ok(serde_json::to_value(drive)?)
}
