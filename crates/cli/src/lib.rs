//! # Overview
//!
//! `gdrv-cli` is the command-line front-end for the gdrv workspace. The
//! crate recognises the verb/noun command surface and the global flags,
//! assembles a per-command [`context::CommandContext`] (no global state),
//! dispatches to the handler modules, and prints exactly one output
//! envelope on stdout.
//!
//! # Design
//!
//! [`run`] is the primary entry point. It accepts an iterator of arguments
//! together with handles for standard output and error and returns the
//! process exit code, so binaries stay one-line wrappers and tests can
//! drive the full surface in memory.
//!
//! # Invariants
//!
//! - `run` never panics; failures surface as envelopes plus the mapped
//!   exit code.
//! - Log records go to stderr (or `--log-file`); stdout carries only the
//!   envelope so machine consumers can parse it unconditionally.
//! - Cancellation (Ctrl-C) propagates through one shared token; handlers
//!   observe it between retries, polls, and sync actions.

mod commands;
mod context;
mod frontend;

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use gdrv_core::{AppError, ConfigDir, ErrorKind, LogLevel, OutputWriter, UserConfig};

use crate::context::{CommandContext, GlobalOpts};

pub use frontend::build_command;

/// Parses `args`, executes the selected command, and writes the envelope.
///
/// Returns the process exit code.
pub async fn run<I, T>(args: I, stdout: &mut dyn Write, stderr: &mut dyn Write) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = match frontend::build_command().try_get_matches_from(args) {
        Ok(matches) => matches,
        Err(error) => {
            use clap::error::ErrorKind as ClapKind;
            let rendered = error.render();
            if matches!(error.kind(), ClapKind::DisplayHelp | ClapKind::DisplayVersion) {
                let _ = write!(stdout, "{rendered}");
                return 0;
            }
            let _ = write!(stderr, "{rendered}");
            return ErrorKind::InvalidArgument.exit_code();
        }
    };

    let config_dir = match matches.get_one::<String>("config") {
        Some(path) => ConfigDir::at(PathBuf::from(path)),
        None => match ConfigDir::resolve() {
            Ok(dir) => dir,
            Err(error) => return emit_early_failure(stdout, &error),
        },
    };
    let config = match UserConfig::load(&config_dir.config_file()) {
        Ok(config) => config,
        Err(error) => return emit_early_failure(stdout, &error),
    };

    let globals = globals_from(&matches, &config);
    init_logging(&globals, &config);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, draining in-flight work");
            signal_cancel.cancel();
        }
    });

    let mut cx = CommandContext::new(globals, config_dir, config, cancel);
    let (command, result) = frontend::dispatch(&mut cx, &matches).await;

    match result {
        Ok(data) => {
            if cx.writer.write_success(stdout, &command, data).is_err() {
                return 1;
            }
            0
        }
        Err(error) => {
            tracing::debug!(command, kind = error.kind().code(), "command failed");
            if cx.writer.write_error(stdout, &command, &error).is_err() {
                return 1;
            }
            error.exit_code()
        }
    }
}

fn emit_early_failure(stdout: &mut dyn Write, error: &AppError) -> i32 {
    let mut writer = OutputWriter::new(gdrv_core::OutputFormat::Json);
    let _ = writer.write_error(stdout, "startup", error);
    error.exit_code()
}

fn globals_from(matches: &clap::ArgMatches, config: &UserConfig) -> GlobalOpts {
    GlobalOpts {
        profile: matches
            .get_one::<String>("profile")
            .cloned()
            .unwrap_or_else(|| config.default_profile.clone()),
        drive_id: matches.get_one::<String>("drive-id").cloned(),
        output: frontend::output_format(matches, &config.default_output_format),
        quiet: matches.get_flag("quiet"),
        verbose: matches.get_flag("verbose"),
        debug: matches.get_flag("debug"),
        strict: matches.get_flag("strict"),
        no_cache: matches.get_flag("no-cache"),
        cache_ttl: matches.get_one::<u64>("cache-ttl").copied(),
        include_shared_with_me: matches.get_flag("include-shared-with-me"),
        dry_run: matches.get_flag("dry-run"),
        force: matches.get_flag("force"),
        assume_yes: matches.get_flag("yes"),
        client_id: matches.get_one::<String>("client-id").cloned(),
        client_secret: matches.get_one::<String>("client-secret").cloned(),
        storage: frontend::storage_override(matches),
        log_file: matches.get_one::<String>("log-file").cloned(),
    }
}

fn init_logging(globals: &GlobalOpts, config: &UserConfig) {
    let level = if globals.debug {
        "debug"
    } else if globals.verbose {
        "info"
    } else if globals.quiet {
        "error"
    } else {
        match config.log_level {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "info",
            LogLevel::Quiet => "error",
            LogLevel::Normal => "warn",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if let Some(path) = &globals.log_file {
        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(move || file.try_clone().expect("log file clone"))
                .try_init();
            return;
        }
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.color_output && is_terminal::IsTerminal::is_terminal(&std::io::stderr()))
        .with_writer(std::io::stderr)
        .try_init();
}
