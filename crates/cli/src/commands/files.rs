//! `gdrv files ...` handlers.

use std::path::PathBuf;

use clap::ArgMatches;
use serde_json::{json, Value};

use gdrv_core::{AppError, AppResult, ErrorKind, RequestType};
use gdrv_drive::about::AboutApi;
use gdrv_drive::files::FilesApi;
use gdrv_transport::looks_like_path;

use super::{optional, required, unknown};
use crate::context::CommandContext;

pub async fn dispatch(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("files", "");
    };
    let name = format!("files.{verb}");
    let result = match verb {
        "list" => list(cx, sub).await,
        "get" => get(cx, sub).await,
        "upload" => upload(cx, sub).await,
        "download" => download(cx, sub).await,
        "export" => export(cx, sub).await,
        "delete" => delete(cx, sub).await,
        "copy" => copy(cx, sub).await,
        "move" => move_file(cx, sub).await,
        "trash" => trash(cx, sub).await,
        "restore" => restore(cx, sub).await,
        "revisions" => revisions(cx, sub).await,
        "list-trashed" => list_trashed(cx).await,
        "export-formats" => export_formats(cx).await,
        other => return unknown("files", other),
    };
    (name, result)
}

async fn list(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let page_size = *matches.get_one::<u32>("page-size").unwrap_or(&100);
    let mut query = optional(matches, "query").map(str::to_owned);
    if query.is_none() && !cx.globals.include_shared_with_me {
        query = Some(String::from("'me' in owners and trashed = false"));
    }
    let files = FilesApi::new(&api)
        .list(&req_ctx, query.as_deref(), optional(matches, "fields"), page_size)
        .await?;
    let count = files.len();
    Ok(json!({ "files": files, "count": count }))
}

async fn get(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::GetById);
    let operand = required(matches, "file")?.to_owned();
    let id = cx.resolve_operand(&api, &req_ctx, &operand).await?;
    let mut req_ctx = cx.req_ctx(RequestType::GetById);
    req_ctx.note_file_id(id.clone());
    let file = FilesApi::new(&api)
        .get(&req_ctx, &id, optional(matches, "fields"))
        .await?;
    Ok(serde_json::to_value(file)?)
}

async fn upload(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let local = PathBuf::from(required(matches, "local")?);
    if !local.is_file() {
        return Err(AppError::new(
            ErrorKind::InvalidArgument,
            format!("{} is not a readable file", local.display()),
        ));
    }
    let parent = match optional(matches, "parent") {
        Some(parent) => {
            let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
            Some(cx.resolve_operand(&api, &req_ctx, parent).await?)
        }
        None => None,
    };
    let name = optional(matches, "name")
        .map(str::to_owned)
        .or_else(|| local.file_name().map(|n| n.to_string_lossy().into_owned()))
        .ok_or_else(|| AppError::new(ErrorKind::InvalidArgument, "cannot derive a remote name"))?;

    let mut req_ctx = cx.req_ctx(RequestType::Mutation);
    if let Some(parent) = &parent {
        req_ctx.note_parent_id(parent.clone());
    }
    let file = FilesApi::new(&api)
        .upload(&req_ctx, &local, &name, parent.as_deref(), None)
        .await?;
    Ok(serde_json::to_value(file)?)
}

async fn download(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let operand = required(matches, "file")?.to_owned();
    let id = cx.resolve_operand(&api, &req_ctx, &operand).await?;
    let dest = PathBuf::from(required(matches, "dest")?);

    let mut req_ctx = cx.req_ctx(RequestType::DownloadOrExport);
    req_ctx.note_file_id(id.clone());
    FilesApi::new(&api).download(&req_ctx, &id, &dest).await?;
    Ok(json!({ "fileId": id, "dest": dest.display().to_string() }))
}

async fn export(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let operand = required(matches, "file")?.to_owned();
    let id = cx.resolve_operand(&api, &req_ctx, &operand).await?;
    let dest = PathBuf::from(required(matches, "dest")?);
    let mime = required(matches, "mime")?;

    let mut req_ctx = cx.req_ctx(RequestType::DownloadOrExport);
    req_ctx.note_file_id(id.clone());
    FilesApi::new(&api).export(&req_ctx, &id, mime, &dest).await?;
    Ok(json!({
        "fileId": id,
        "mimeType": mime,
        "dest": dest.display().to_string(),
    }))
}

async fn delete(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    if !(cx.globals.assume_yes || cx.globals.force) {
        return Err(AppError::new(
            ErrorKind::InvalidArgument,
            "permanent deletion requires --yes (or --force)",
        ));
    }
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let operand = required(matches, "file")?.to_owned();
    let id = cx.resolve_operand(&api, &req_ctx, &operand).await?;
    invalidate_if_path(cx, &operand);

    let mut req_ctx = cx.req_ctx(RequestType::Mutation);
    req_ctx.note_file_id(id.clone());
    FilesApi::new(&api).delete(&req_ctx, &id).await?;
    Ok(json!({ "fileId": id, "deleted": true }))
}

async fn copy(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let operand = required(matches, "file")?.to_owned();
    let id = cx.resolve_operand(&api, &req_ctx, &operand).await?;
    let parent = match optional(matches, "parent") {
        Some(parent) => Some(cx.resolve_operand(&api, &req_ctx, parent).await?),
        None => None,
    };
    let mut req_ctx = cx.req_ctx(RequestType::Mutation);
    req_ctx.note_file_id(id.clone());
    let file = FilesApi::new(&api)
        .copy(&req_ctx, &id, optional(matches, "name"), parent.as_deref())
        .await?;
    Ok(serde_json::to_value(file)?)
}

async fn move_file(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let operand = required(matches, "file")?.to_owned();
    let id = cx.resolve_operand(&api, &req_ctx, &operand).await?;
    let parent_operand = required(matches, "parent")?.to_owned();
    let new_parent = cx.resolve_operand(&api, &req_ctx, &parent_operand).await?;
    invalidate_if_path(cx, &operand);

    let mut meta_ctx = cx.req_ctx(RequestType::GetById);
    meta_ctx.note_file_id(id.clone());
    let current = FilesApi::new(&api)
        .get(&meta_ctx, &id, Some("id, parents"))
        .await?;
    let old_parent = current
        .parents
        .as_ref()
        .and_then(|parents| parents.first())
        .cloned();

    let mut req_ctx = cx.req_ctx(RequestType::Mutation);
    req_ctx.note_file_id(id.clone());
    req_ctx.note_parent_id(new_parent.clone());
    let file = FilesApi::new(&api)
        .move_file(&req_ctx, &id, &new_parent, old_parent.as_deref())
        .await?;
    Ok(serde_json::to_value(file)?)
}

async fn trash(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let operand = required(matches, "file")?.to_owned();
    let id = cx.resolve_operand(&api, &req_ctx, &operand).await?;
    invalidate_if_path(cx, &operand);

    let mut req_ctx = cx.req_ctx(RequestType::Mutation);
    req_ctx.note_file_id(id.clone());
    let file = FilesApi::new(&api).trash(&req_ctx, &id).await?;
    Ok(serde_json::to_value(file)?)
}

async fn restore(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let id = required(matches, "file")?.to_owned();
    let mut req_ctx = cx.req_ctx(RequestType::Mutation);
    req_ctx.note_file_id(id.clone());
    let file = FilesApi::new(&api).restore(&req_ctx, &id).await?;
    Ok(serde_json::to_value(file)?)
}

async fn revisions(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let operand = required(matches, "file")?.to_owned();
    let id = cx.resolve_operand(&api, &req_ctx, &operand).await?;
    let mut req_ctx = cx.req_ctx(RequestType::GetById);
    req_ctx.note_file_id(id.clone());
    let revisions = FilesApi::new(&api).revisions(&req_ctx, &id).await?;
    Ok(json!({ "fileId": id, "revisions": revisions.revisions }))
}

async fn list_trashed(cx: &mut CommandContext) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let files = FilesApi::new(&api).list_trashed(&req_ctx).await?;
    let count = files.len();
    Ok(json!({ "files": files, "count": count }))
}

async fn export_formats(cx: &mut CommandContext) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::GetById);
    AboutApi::new(&api).export_formats(&req_ctx).await
}

fn invalidate_if_path(cx: &CommandContext, operand: &str) {
    if looks_like_path(operand) {
        cx.invalidate_path(operand);
    }
}
