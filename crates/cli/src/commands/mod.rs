//! Per-family command handlers.
//!
//! Every handler follows the same shape: build a request context bound to
//! the command's trace id, call the API wrapper, and return the envelope
//! payload. Dispatch functions pair the payload with the `verb.noun` label
//! the envelope carries.

pub mod about;
pub mod activity;
pub mod admin;
pub mod auth;
pub mod changes;
pub mod config_cmd;
pub mod docs;
pub mod drives;
pub mod files;
pub mod labels;
pub mod permissions;
pub mod sheets;
pub mod slides;
pub mod sync;

use clap::ArgMatches;

use gdrv_core::{AppError, AppResult, ErrorKind};

/// Fetches a required string argument.
pub(crate) fn required<'a>(matches: &'a ArgMatches, name: &str) -> AppResult<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| AppError::new(ErrorKind::InvalidArgument, format!("missing <{name}>")))
}

/// Fetches an optional string argument.
pub(crate) fn optional<'a>(matches: &'a ArgMatches, name: &str) -> Option<&'a str> {
    matches.get_one::<String>(name).map(String::as_str)
}

/// Parses an opaque JSON body argument, validating well-formedness only.
pub(crate) fn json_body(matches: &ArgMatches, name: &str) -> AppResult<serde_json::Value> {
    let raw = required(matches, name)?;
    serde_json::from_str(raw).map_err(|error| {
        AppError::new(
            ErrorKind::InvalidArgument,
            format!("--{name} is not valid JSON: {error}"),
        )
    })
}

/// Builds the unknown-subcommand failure for a family.
pub(crate) fn unknown(family: &str, sub: &str) -> (String, AppResult<serde_json::Value>) {
    (
        format!("{family}.{sub}"),
        Err(AppError::new(
            ErrorKind::InvalidArgument,
            format!("unknown {family} command '{sub}'"),
        )),
    )
}
