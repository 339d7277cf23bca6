//! `gdrv config ...` handlers.

use clap::ArgMatches;
use serde_json::{json, Value};

use gdrv_core::{AppResult, UserConfig};

use super::{required, unknown};
use crate::context::CommandContext;

pub async fn dispatch(cx: &mut CommandContext, matches: &ArgMatches) -> (String, AppResult<Value>) {
    let Some((verb, sub)) = matches.subcommand() else {
        return unknown("config", "");
    };
    let name = format!("config.{verb}");
    let result = match verb {
        "show" => show(cx),
        "set" => set(cx, sub),
        "reset" => reset(cx),
        other => return unknown("config", other),
    };
    (name, result)
}

fn show(cx: &mut CommandContext) -> AppResult<Value> {
    Ok(json!({
        "path": cx.config_dir.config_file().display().to_string(),
        "config": serde_json::to_value(&cx.config)?,
    }))
}

fn set(cx: &mut CommandContext, matches: &ArgMatches) -> AppResult<Value> {
    let key = required(matches, "key")?;
    let value = required(matches, "value")?;
    let mut config = UserConfig::load(&cx.config_dir.config_file())?;
    config.set(key, value)?;
    config.save(&cx.config_dir.config_file())?;
    cx.config = config.clone();
    Ok(json!({ "key": key, "value": value, "config": serde_json::to_value(&config)? }))
}

fn reset(cx: &mut CommandContext) -> AppResult<Value> {
    let config = UserConfig::default();
    config.save(&cx.config_dir.config_file())?;
    cx.config = config.clone();
    Ok(json!({ "reset": true, "config": serde_json::to_value(&config)? }))
}
