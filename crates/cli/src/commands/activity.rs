//! `gdrv activity ...` handlers.

use clap::ArgMatches;
use serde_json::Value;

use gdrv_core::{AppResult, RequestType};
use gdrv_drive::activity::ActivityApi;

use super::{optional, unknown};
use crate::context::CommandContext;

pub async fn dispatch(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("activity", "");
    };
    match verb {
        "query" => (String::from("activity.query"), query(cx, sub).await),
        other => unknown("activity", other),
    }
}

async fn query(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let api = cx.api().await?;
    let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
    let page_size = *matches.get_one::<u32>("page-size").unwrap_or(&50);
    ActivityApi::new(&api)
        .query(
            &req_ctx,
            optional(matches, "item"),
            optional(matches, "folder"),
            page_size,
        )
        .await
}
