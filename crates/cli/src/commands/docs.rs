//! `gdrv docs ...` handlers.

use clap::ArgMatches;
use serde_json::{json, Value};

use gdrv_core::{AppResult, RequestType};
use gdrv_drive::docs::DocsApi;

use super::{json_body, required, unknown};
use crate::context::CommandContext;

pub async fn dispatch(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("docs", "");
    };
    let name = format!("docs.{verb}");
    let result = match verb {
        "list" => list(cx).await,
        "get" => get(cx, sub).await,
        "read" => read(cx, sub).await,
        "create" => create(cx, sub).await,
        "update" => update(cx, sub).await,
        other => return unknown("docs", other),
    };
    (name, result)
}

async fn list(cx: &mut CommandContext) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let documents = DocsApi::new(&api).list(&req_ctx).await?;
    let count = documents.len();
    Ok(json!({ "documents": documents, "count": count }))
}

async fn get(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::GetById);
    DocsApi::new(&api).get(&req_ctx, required(matches, "doc")?).await
}

async fn read(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::DownloadOrExport);
    let id = required(matches, "doc")?;
    let content = DocsApi::new(&api).read_text(&req_ctx, id).await?;
    Ok(json!({ "documentId": id, "content": content }))
}

async fn create(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    DocsApi::new(&api)
        .create(&req_ctx, required(matches, "title")?)
        .await
}

async fn update(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    let body = json_body(matches, "body")?;
    DocsApi::new(&api)
        .batch_update(&req_ctx, required(matches, "doc")?, &body)
        .await
}
