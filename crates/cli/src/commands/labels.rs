//! `gdrv labels ...` handlers.

use clap::ArgMatches;
use serde_json::Value;

use gdrv_core::{AppResult, RequestType};
use gdrv_drive::labels::LabelsApi;

use super::{required, unknown};
use crate::context::CommandContext;

pub async fn dispatch(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("labels", "");
    };
    let name = format!("labels.{verb}");
    let result = match verb {
        "list" => list(cx).await,
        "get" => get(cx, sub).await,
        other => return unknown("labels", other),
    };
    (name, result)
}

async fn list(cx: &mut CommandContext) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    LabelsApi::new(&api).list(&req_ctx).await
}

async fn get(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::GetById);
    LabelsApi::new(&api)
        .get(&req_ctx, required(matches, "label")?)
        .await
}
