//! `gdrv sheets ...` handlers.

use clap::ArgMatches;
use serde_json::{json, Value};

use gdrv_core::{AppResult, RequestType};
use gdrv_drive::sheets::SheetsApi;

use super::{json_body, required, unknown};
use crate::context::CommandContext;

pub async fn dispatch(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("sheets", "");
    };
    let result = match verb {
        "list" => (String::from("sheets.list"), list(cx).await),
        "create" => (String::from("sheets.create"), create(cx, sub).await),
        "get" => (String::from("sheets.get"), get(cx, sub).await),
        "values" => return values(cx, sub).await,
        "batch-update" => (String::from("sheets.batch-update"), batch_update(cx, sub).await),
        other => return unknown("sheets", other),
    };
    result
}

async fn values(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("sheets.values", "");
    };
    let name = format!("sheets.values.{verb}");
    let result = match verb {
        "get" => values_get(cx, sub).await,
        "update" => values_update(cx, sub).await,
        "append" => values_append(cx, sub).await,
        "clear" => values_clear(cx, sub).await,
        other => return unknown("sheets.values", other),
    };
    (name, result)
}

async fn list(cx: &mut CommandContext) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let sheets = SheetsApi::new(&api).list(&req_ctx).await?;
    let count = sheets.len();
    Ok(json!({ "spreadsheets": sheets, "count": count }))
}

async fn create(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    SheetsApi::new(&api)
        .create(&req_ctx, required(matches, "title")?)
        .await
}

async fn get(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::GetById);
    SheetsApi::new(&api)
        .get(&req_ctx, required(matches, "sheet")?)
        .await
}

async fn values_get(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::GetById);
    SheetsApi::new(&api)
        .values_get(&req_ctx, required(matches, "sheet")?, required(matches, "range")?)
        .await
}

async fn values_update(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    let values = json_body(matches, "values")?;
    SheetsApi::new(&api)
        .values_update(
            &req_ctx,
            required(matches, "sheet")?,
            required(matches, "range")?,
            &values,
        )
        .await
}

async fn values_append(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    let values = json_body(matches, "values")?;
    SheetsApi::new(&api)
        .values_append(
            &req_ctx,
            required(matches, "sheet")?,
            required(matches, "range")?,
            &values,
        )
        .await
}

async fn values_clear(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    SheetsApi::new(&api)
        .values_clear(&req_ctx, required(matches, "sheet")?, required(matches, "range")?)
        .await
}

async fn batch_update(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    let body = json_body(matches, "body")?;
    SheetsApi::new(&api)
        .batch_update(&req_ctx, required(matches, "sheet")?, &body)
        .await
}
