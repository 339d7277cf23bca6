//! `gdrv sync ...` handlers.

use std::path::PathBuf;
use std::sync::Arc;

use clap::ArgMatches;
use serde_json::{json, Value};
use uuid::Uuid;

use gdrv_core::{AppError, AppResult, ErrorKind, RequestType};
use gdrv_drive::SyncOps;
use gdrv_engine::{SyncEngine, SyncOptions, SyncPlan};
use gdrv_state::{ConflictPolicy, SyncConfig, SyncDirection, SyncStateStore};

use super::{optional, required, unknown};
use crate::context::CommandContext;

pub async fn dispatch(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("sync", "");
    };
    match verb {
        "init" => (String::from("sync.init"), init(cx, sub).await),
        "push" => (String::from("sync.push"), run_pair(cx, sub, Mode::Push).await),
        "pull" => (String::from("sync.pull"), run_pair(cx, sub, Mode::Pull).await),
        "status" => (String::from("sync.status"), run_pair(cx, sub, Mode::Status).await),
        "run" => (String::from("sync.run"), run_pair(cx, sub, Mode::Both).await),
        "list" => (String::from("sync.list"), list(cx)),
        "remove" => (String::from("sync.remove"), remove(cx, sub)),
        // `gdrv sync <id>` is shorthand for a bidirectional run.
        pair_id => (
            String::from("sync.run"),
            run_pair_by_id(cx, pair_id, &SyncOptions::default(), Mode::Both).await,
        ),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Push,
    Pull,
    Status,
    Both,
}

fn open_store(cx: &CommandContext) -> AppResult<SyncStateStore> {
    cx.config_dir.ensure_sync_dir()?;
    SyncStateStore::open(&cx.config_dir.sync_db())
}

async fn init(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let local = PathBuf::from(required(matches, "local")?);
    if !local.is_absolute() {
        return Err(AppError::new(
            ErrorKind::InvalidArgument,
            "the local root must be an absolute path",
        ));
    }
    let remote_operand = required(matches, "remote")?.to_owned();
    // `folderId=<id>` names the remote root directly; anything else goes
    // through path resolution.
    let remote_root_id = match remote_operand.strip_prefix("folderId=") {
        Some(id) => id.to_owned(),
        None => {
            let api = cx.api().await?;
            let req_ctx = cx.req_ctx(RequestType::ListOrSearch);
            cx.resolve_operand(&api, &req_ctx, &remote_operand).await?
        }
    };

    let id = optional(matches, "id")
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let config = SyncConfig {
        id: id.clone(),
        local_root: local,
        remote_root_id,
        excludes: matches
            .get_many::<String>("exclude")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
        conflict_policy: optional(matches, "conflict")
            .and_then(ConflictPolicy::parse)
            .unwrap_or_default(),
        direction: optional(matches, "direction")
            .and_then(SyncDirection::parse)
            .unwrap_or_default(),
    };
    let store = open_store(cx)?;
    store.upsert_config(&config)?;
    tracing::info!(pair = %id, "sync pair configured");
    Ok(serde_json::to_value(config)?)
}

fn options_from(cx: &CommandContext, matches: &ArgMatches, mode: Mode) -> SyncOptions {
    SyncOptions {
        delete: !matches.get_flag("no-delete"),
        dry_run: cx.globals.dry_run || mode == Mode::Status,
        concurrency: *matches.get_one::<usize>("concurrency").unwrap_or(&5),
        continue_on_error: !matches.get_flag("stop-on-error"),
        use_changes: !matches.get_flag("full-scan"),
        policy_override: optional(matches, "conflict").and_then(ConflictPolicy::parse),
        direction_override: match mode {
            Mode::Push => Some(SyncDirection::Push),
            Mode::Pull => Some(SyncDirection::Pull),
            Mode::Status | Mode::Both => None,
        },
    }
}

async fn run_pair(cx: &mut CommandContext, matches: &ArgMatches, mode: Mode) -> AppResult<Value> {
    let pair_id = required(matches, "id")?.to_owned();
    let opts = options_from(cx, matches, mode);
    run_pair_by_id(cx, &pair_id, &opts, mode).await
}

async fn run_pair_by_id(
    cx: &mut CommandContext,
    pair_id: &str,
    opts: &SyncOptions,
    mode: Mode,
) -> AppResult<Value> {
    let store = open_store(cx)?;
    let config = store.require_config(pair_id)?;
    let api = cx.api().await?;
    let ops = Arc::new(SyncOps::new(
        Arc::clone(&api),
        cx.globals.profile.clone(),
        cx.writer.trace_id(),
        cx.globals.drive_id.clone(),
        config.remote_root_id.clone(),
    ));

    let engine = SyncEngine::new(&store);
    let plan = engine.plan(&config, ops.as_ref(), opts).await?;

    if mode == Mode::Status || opts.dry_run {
        return Ok(plan_payload(pair_id, &plan, true));
    }

    let summary = engine
        .apply(&config, &plan, &ops, opts, &cx.cancel)
        .await?;
    let mut payload = plan_payload(pair_id, &plan, false);
    payload["summary"] = serde_json::to_value(&summary)?;
    if !summary.failures.is_empty() {
        payload["partial"] = json!(true);
    }
    Ok(payload)
}

fn plan_payload(pair_id: &str, plan: &SyncPlan, dry_run: bool) -> Value {
    json!({
        "pairId": pair_id,
        "dryRun": dry_run,
        "actionCount": plan.actions.len(),
        "actions": plan.actions,
        "conflicts": plan.conflicts,
    })
}

fn list(cx: &mut CommandContext) -> AppResult<Value> {
    let store = open_store(cx)?;
    let configs = store.list_configs()?;
    let count = configs.len();
    Ok(json!({ "pairs": configs, "count": count }))
}

fn remove(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let pair_id = required(matches, "id")?;
    let store = open_store(cx)?;
    let removed = store.remove_config(pair_id)?;
    if !removed {
        return Err(AppError::new(
            ErrorKind::NotFound,
            format!("no sync configuration '{pair_id}'"),
        ));
    }
    Ok(json!({ "pairId": pair_id, "removed": true }))
}
