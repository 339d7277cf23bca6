//! `gdrv changes ...` handlers.

use clap::ArgMatches;
use serde_json::{json, Value};

use gdrv_core::{AppResult, RequestType};
use gdrv_drive::changes::ChangesApi;

use super::{optional, required, unknown};
use crate::context::CommandContext;

pub async fn dispatch(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("changes", "");
    };
    let name = format!("changes.{verb}");
    let result = match verb {
        "start-page-token" => start_page_token(cx).await,
        "list" => list(cx, sub).await,
        "watch" => watch(cx, sub).await,
        "stop" => stop(cx, sub).await,
        other => return unknown("changes", other),
    };
    (name, result)
}

async fn start_page_token(cx: &mut CommandContext) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::GetById);
    let token = ChangesApi::new(&api).start_page_token(&req_ctx).await?;
    Ok(json!({ "startPageToken": token }))
}

async fn list(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let page = ChangesApi::new(&api)
        .list(&req_ctx, required(matches, "token")?)
        .await?;
    Ok(json!({
        "changes": page.changes.iter().map(|change| json!({
            "fileId": change.file_id,
            "removed": change.removed,
            "time": change.time,
            "file": change.file,
        })).collect::<Vec<_>>(),
        "nextPageToken": page.next_page_token,
        "newStartPageToken": page.new_start_page_token,
    }))
}

/// Polls the feed at a fixed interval, emitting one envelope per poll on
/// stdout, until the command is cancelled.
async fn watch(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let interval = std::time::Duration::from_secs(*matches.get_one::<u64>("interval").unwrap_or(&30));

    let mut token = match optional(matches, "token") {
        Some(token) => token.to_owned(),
        None => {
            let req_ctx = cx.req_ctx(RequestType::GetById);
            ChangesApi::new(&api).start_page_token(&req_ctx).await?
        }
    };
    let mut polls: u64 = 0;
    loop {
        tokio::select! {
            () = cx.cancel.cancelled() => {
                return Ok(json!({ "stopped": true, "polls": polls, "lastToken": token }));
            }
            () = tokio::time::sleep(interval) => {}
        }
        let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
        let page = ChangesApi::new(&api).list(&req_ctx, &token).await?;
        polls += 1;
        if !page.changes.is_empty() {
            let tick = json!({
                "token": token,
                "changes": page.changes.iter().map(|change| json!({
                    "fileId": change.file_id,
                    "removed": change.removed,
                    "time": change.time,
                })).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string(&tick).unwrap_or_default());
        }
        if let Some(next) = page.new_start_page_token {
            token = next;
        } else if let Some(next) = page.next_page_token {
            token = next;
        }
    }
}

async fn stop(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::Mutation);
    let channel = required(matches, "channel")?;
    ChangesApi::new(&api)
        .stop(&req_ctx, channel, required(matches, "resource")?)
        .await?;
    Ok(json!({ "channel": channel, "stopped": true }))
}
