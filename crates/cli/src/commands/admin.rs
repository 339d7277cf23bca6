//! `gdrv admin ...` handlers.

use clap::ArgMatches;
use serde_json::{json, Value};

use gdrv_core::{AppResult, RequestType};
use gdrv_drive::admin::AdminApi;

use super::{json_body, optional, required, unknown};
use crate::context::CommandContext;

pub async fn dispatch(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    match matches.subcommand() {
        Some(("users", sub)) => users(cx, sub).await,
        Some(("groups", sub)) => groups(cx, sub).await,
        Some((other, _)) => unknown("admin", other),
        None => unknown("admin", ""),
    }
}

async fn users(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("admin.users", "");
    };
    let name = format!("admin.users.{verb}");
    let result = match verb {
        "list" => users_list(cx, sub).await,
        "get" => users_get(cx, sub).await,
        "create" => users_create(cx, sub).await,
        "update" => users_update(cx, sub).await,
        "delete" => users_delete(cx, sub).await,
        other => return unknown("admin.users", other),
    };
    (name, result)
}

async fn groups(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("admin.groups", "");
    };
    let name = format!("admin.groups.{verb}");
    let result = match verb {
        "list" => groups_list(cx, sub).await,
        "get" => groups_get(cx, sub).await,
        "create" => groups_create(cx, sub).await,
        "delete" => groups_delete(cx, sub).await,
        other => return unknown("admin.groups", other),
    };
    (name, result)
}

async fn users_list(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    AdminApi::new(&api)
        .users_list(&req_ctx, optional(matches, "domain"))
        .await
}

async fn users_get(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::GetById);
    AdminApi::new(&api)
        .users_get(&req_ctx, required(matches, "user")?)
        .await
}

async fn users_create(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    let body = json_body(matches, "body")?;
    AdminApi::new(&api).users_create(&req_ctx, &body).await
}

async fn users_update(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    let body = json_body(matches, "body")?;
    AdminApi::new(&api)
        .users_update(&req_ctx, required(matches, "user")?, &body)
        .await
}

async fn users_delete(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    let user = required(matches, "user")?;
    AdminApi::new(&api).users_delete(&req_ctx, user).await?;
    Ok(json!({ "user": user, "deleted": true }))
}

async fn groups_list(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    AdminApi::new(&api)
        .groups_list(&req_ctx, optional(matches, "domain"))
        .await
}

async fn groups_get(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::GetById);
    AdminApi::new(&api)
        .groups_get(&req_ctx, required(matches, "group")?)
        .await
}

async fn groups_create(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    let body = json_body(matches, "body")?;
    AdminApi::new(&api).groups_create(&req_ctx, &body).await
}

async fn groups_delete(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    let group = required(matches, "group")?;
    AdminApi::new(&api).groups_delete(&req_ctx, group).await?;
    Ok(json!({ "group": group, "deleted": true }))
}
