//! `gdrv permissions ...` handlers.

use std::collections::BTreeMap;

use clap::ArgMatches;
use serde_json::{json, Value};

use gdrv_core::{AppError, AppResult, ErrorKind, RequestType};
use gdrv_drive::files::FilesApi;
use gdrv_drive::permissions::PermissionsApi;
use gdrv_drive::ApiContext;

use super::{optional, required, unknown};
use crate::context::CommandContext;

pub async fn dispatch(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("permissions", "");
    };
    let name = format!("permissions.{verb}");
    let result = match verb {
        "list" => list(cx, sub).await,
        "create" => create(cx, sub).await,
        "update" => update(cx, sub).await,
        "remove" => remove(cx, sub).await,
        "create-link" => create_link(cx, sub).await,
        "audit" | "analyze" => audit(cx, sub).await,
        "report" => report(cx, sub).await,
        "bulk" => bulk(cx, sub).await,
        "search" => search(cx, sub).await,
        other => return unknown("permissions", other),
    };
    (name, result)
}

async fn resolve_file(
    cx: &mut CommandContext,
    api: &ApiContext,
    matches: &ArgMatches,
) -> AppResult<String> {
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let operand = required(matches, "file")?.to_owned();
    cx.resolve_operand(api, &req_ctx, &operand).await
}

async fn list(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let id = resolve_file(cx, &api, matches).await?;
    let mut req_ctx = cx.req_ctx(RequestType::PermissionOp);
    req_ctx.note_file_id(id.clone());
    let permissions = PermissionsApi::new(&api).list(&req_ctx, &id).await?;
    Ok(json!({ "fileId": id, "permissions": permissions }))
}

fn grantee_body(matches: &ArgMatches) -> AppResult<Value> {
    let role = required(matches, "role")?;
    let grantee_type = required(matches, "type")?;
    let mut body = serde_json::Map::new();
    body.insert(String::from("role"), json!(role));
    body.insert(String::from("type"), json!(grantee_type));
    match grantee_type {
        "user" | "group" => {
            let email = required(matches, "email").map_err(|_| {
                AppError::new(
                    ErrorKind::InvalidArgument,
                    format!("--email is required for type {grantee_type}"),
                )
            })?;
            body.insert(String::from("emailAddress"), json!(email));
        }
        "domain" => {
            let domain = required(matches, "domain").map_err(|_| {
                AppError::new(ErrorKind::InvalidArgument, "--domain is required for type domain")
            })?;
            body.insert(String::from("domain"), json!(domain));
        }
        "anyone" => {}
        other => {
            return Err(AppError::new(
                ErrorKind::InvalidArgument,
                format!("unknown grantee type '{other}'"),
            ));
        }
    }
    Ok(Value::Object(body))
}

async fn create(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let id = resolve_file(cx, &api, matches).await?;
    let body = grantee_body(matches)?;
    let mut req_ctx = cx.req_ctx(RequestType::PermissionOp);
    req_ctx.note_file_id(id.clone());
    let permission = PermissionsApi::new(&api).create(&req_ctx, &id, &body).await?;
    Ok(json!({ "fileId": id, "permission": permission }))
}

async fn update(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let id = resolve_file(cx, &api, matches).await?;
    let permission_id = required(matches, "permission")?;
    let role = required(matches, "role")?;
    let mut req_ctx = cx.req_ctx(RequestType::PermissionOp);
    req_ctx.note_file_id(id.clone());
    let permission = PermissionsApi::new(&api)
        .update(&req_ctx, &id, permission_id, role)
        .await?;
    Ok(json!({ "fileId": id, "permission": permission }))
}

async fn remove(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let id = resolve_file(cx, &api, matches).await?;
    let permission_id = required(matches, "permission")?;
    let mut req_ctx = cx.req_ctx(RequestType::PermissionOp);
    req_ctx.note_file_id(id.clone());
    PermissionsApi::new(&api)
        .remove(&req_ctx, &id, permission_id)
        .await?;
    Ok(json!({ "fileId": id, "removed": permission_id }))
}

async fn create_link(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let id = resolve_file(cx, &api, matches).await?;
    let role = optional(matches, "role").unwrap_or("reader");
    let mut req_ctx = cx.req_ctx(RequestType::PermissionOp);
    req_ctx.note_file_id(id.clone());
    let permission = PermissionsApi::new(&api)
        .create_link(&req_ctx, &id, role)
        .await?;

    let meta_ctx = cx.req_ctx(RequestType::GetById);
    let file = FilesApi::new(&api)
        .get(&meta_ctx, &id, Some("id, webViewLink"))
        .await?;
    Ok(json!({
        "fileId": id,
        "permission": permission,
        "link": file.web_view_link,
    }))
}

/// Summarizes the grants on one file: per-role and per-grantee counts plus
/// flags for public access.
async fn audit(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let id = resolve_file(cx, &api, matches).await?;
    let mut req_ctx = cx.req_ctx(RequestType::PermissionOp);
    req_ctx.note_file_id(id.clone());
    let permissions = PermissionsApi::new(&api).list(&req_ctx, &id).await?;

    let mut by_role: BTreeMap<String, u64> = BTreeMap::new();
    let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
    let mut anyone = false;
    let mut domains = Vec::new();
    for permission in &permissions {
        *by_role.entry(permission.role.clone()).or_default() += 1;
        *by_type.entry(permission.grantee_type.clone()).or_default() += 1;
        if permission.grantee_type == "anyone" {
            anyone = true;
        }
        if let Some(domain) = &permission.domain {
            domains.push(domain.clone());
        }
    }
    Ok(json!({
        "fileId": id,
        "total": permissions.len(),
        "byRole": by_role,
        "byType": by_type,
        "publiclyAccessible": anyone,
        "domains": domains,
        "permissions": permissions,
    }))
}

/// Permission report over a file listing.
async fn report(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let query = optional(matches, "query")
        .map(str::to_owned)
        .unwrap_or_else(|| String::from("'me' in owners and trashed = false"));
    let files = FilesApi::new(&api)
        .list(&req_ctx, Some(&query), Some("nextPageToken, files(id, name)"), 100)
        .await?;

    let permissions_api = PermissionsApi::new(&api);
    let mut rows = Vec::new();
    for file in &files {
        let mut req_ctx = cx.req_ctx(RequestType::PermissionOp);
        req_ctx.note_file_id(file.id.clone());
        let permissions = permissions_api.list(&req_ctx, &file.id).await?;
        rows.push(json!({
            "fileId": file.id,
            "name": file.name,
            "grants": permissions.len(),
            "public": permissions.iter().any(|p| p.grantee_type == "anyone"),
        }));
    }
    Ok(json!({ "files": rows }))
}

/// Applies one grant to many files.
async fn bulk(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let body = grantee_body(matches)?;
    let files: Vec<String> = matches
        .get_many::<String>("files")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let permissions_api = PermissionsApi::new(&api);
    let mut granted = Vec::new();
    let mut failures = Vec::new();
    for file in &files {
        let mut req_ctx = cx.req_ctx(RequestType::PermissionOp);
        req_ctx.note_file_id(file.clone());
        match permissions_api.create(&req_ctx, file, &body).await {
            Ok(permission) => granted.push(json!({ "fileId": file, "permissionId": permission.id })),
            Err(error) => failures.push(json!({ "fileId": file, "error": error.message() })),
        }
    }
    Ok(json!({ "granted": granted, "failures": failures }))
}

/// Finds files shared with a specific account.
async fn search(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let email = required(matches, "email")?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let files = FilesApi::new(&api)
        .list(
            &req_ctx,
            Some("trashed = false"),
            Some("nextPageToken, files(id, name)"),
            100,
        )
        .await?;

    let permissions_api = PermissionsApi::new(&api);
    let mut matching = Vec::new();
    for file in &files {
        let mut req_ctx = cx.req_ctx(RequestType::PermissionOp);
        req_ctx.note_file_id(file.id.clone());
        let permissions = permissions_api.list(&req_ctx, &file.id).await?;
        if let Some(grant) = permissions
            .iter()
            .find(|p| p.email_address.as_deref() == Some(email))
        {
            matching.push(json!({
                "fileId": file.id,
                "name": file.name,
                "role": grant.role,
            }));
        }
    }
    Ok(json!({ "email": email, "files": matching }))
}
