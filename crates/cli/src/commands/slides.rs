//! `gdrv slides ...` handlers.

use clap::ArgMatches;
use serde_json::{json, Value};

use gdrv_core::{AppResult, RequestType};
use gdrv_drive::slides::SlidesApi;

use super::{json_body, required, unknown};
use crate::context::CommandContext;

pub async fn dispatch(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("slides", "");
    };
    let name = format!("slides.{verb}");
    let result = match verb {
        "list" => list(cx).await,
        "get" => get(cx, sub).await,
        "read" => read(cx, sub).await,
        "create" => create(cx, sub).await,
        "update" => update(cx, sub).await,
        "replace" => replace(cx, sub).await,
        other => return unknown("slides", other),
    };
    (name, result)
}

async fn list(cx: &mut CommandContext) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let presentations = SlidesApi::new(&api).list(&req_ctx).await?;
    let count = presentations.len();
    Ok(json!({ "presentations": presentations, "count": count }))
}

async fn get(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::GetById);
    SlidesApi::new(&api)
        .get(&req_ctx, required(matches, "presentation")?)
        .await
}

async fn read(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::DownloadOrExport);
    let id = required(matches, "presentation")?;
    let content = SlidesApi::new(&api).read_text(&req_ctx, id).await?;
    Ok(json!({ "presentationId": id, "content": content }))
}

async fn create(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    SlidesApi::new(&api)
        .create(&req_ctx, required(matches, "title")?)
        .await
}

async fn update(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    let body = json_body(matches, "body")?;
    SlidesApi::new(&api)
        .batch_update(&req_ctx, required(matches, "presentation")?, &body)
        .await
}

async fn replace(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    SlidesApi::new(&api)
        .replace_all_text(
            &req_ctx,
            required(matches, "presentation")?,
            required(matches, "find")?,
            required(matches, "replace-with")?,
        )
        .await
}
