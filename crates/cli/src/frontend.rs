//! Command-line definition and dispatch.
//!
//! The clap tree recognises the verb/noun surface (`gdrv files list`,
//! `gdrv sync push c1`, ...) plus the global flags every command accepts.
//! Parsing produces a [`CommandContext`]; dispatch routes to the handler
//! modules and returns the envelope payload for the writer.

use clap::{Arg, ArgAction, ArgMatches, Command};

use gdrv_auth::StorageOverride;
use gdrv_core::{AppError, AppResult, ErrorKind, OutputFormat};

use crate::commands;
use crate::context::CommandContext;

/// Builds the full command tree.
#[must_use]
pub fn build_command() -> Command {
    let global = |command: Command| -> Command {
        command
            .arg(Arg::new("profile").long("profile").global(true).help("Credential profile to use"))
            .arg(Arg::new("drive-id").long("drive-id").global(true).help("Scope operations to a shared drive"))
            .arg(
                Arg::new("output")
                    .long("output")
                    .global(true)
                    .value_parser(["json", "table"])
                    .help("Output format"),
            )
            .arg(Arg::new("json").long("json").global(true).action(ArgAction::SetTrue).help("Alias for --output json"))
            .arg(Arg::new("quiet").long("quiet").global(true).action(ArgAction::SetTrue).help("Only errors on stderr"))
            .arg(Arg::new("verbose").long("verbose").global(true).action(ArgAction::SetTrue).help("Verbose logging"))
            .arg(Arg::new("debug").long("debug").global(true).action(ArgAction::SetTrue).help("Debug logging"))
            .arg(Arg::new("strict").long("strict").global(true).action(ArgAction::SetTrue).help("Fail on ambiguous paths"))
            .arg(Arg::new("no-cache").long("no-cache").global(true).action(ArgAction::SetTrue).help("Bypass the path cache"))
            .arg(
                Arg::new("cache-ttl")
                    .long("cache-ttl")
                    .global(true)
                    .value_parser(clap::value_parser!(u64))
                    .help("Path cache TTL in seconds"),
            )
            .arg(
                Arg::new("include-shared-with-me")
                    .long("include-shared-with-me")
                    .global(true)
                    .action(ArgAction::SetTrue)
                    .help("Include items shared with the user"),
            )
            .arg(Arg::new("config").long("config").global(true).help("Config directory override"))
            .arg(Arg::new("log-file").long("log-file").global(true).help("Append logs to this file"))
            .arg(Arg::new("dry-run").long("dry-run").global(true).action(ArgAction::SetTrue).help("Plan without applying"))
            .arg(Arg::new("force").long("force").global(true).action(ArgAction::SetTrue).help("Skip safety checks"))
            .arg(Arg::new("yes").long("yes").global(true).action(ArgAction::SetTrue).help("Assume yes on confirmation"))
            .arg(Arg::new("client-id").long("client-id").global(true).help("OAuth client id override"))
            .arg(Arg::new("client-secret").long("client-secret").global(true).help("OAuth client secret override"))
            .arg(
                Arg::new("storage")
                    .long("storage")
                    .global(true)
                    .value_parser(["auto", "encrypted", "plain"])
                    .help("Credential storage backend"),
            )
    };

    let command = Command::new("gdrv")
        .about("Scriptable client and sync engine for the Drive platform")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("auth")
                .about("Authentication and credential management")
                .subcommand_required(true)
                .subcommand(
                    Command::new("login")
                        .about("Authorize via the browser (loopback OAuth)")
                        .arg(Arg::new("no-browser").long("no-browser").action(ArgAction::SetTrue))
                        .arg(Arg::new("scopes").long("scopes").num_args(1..).help("Scopes to request")),
                )
                .subcommand(
                    Command::new("device")
                        .about("Authorize via the device-code flow")
                        .arg(Arg::new("scopes").long("scopes").num_args(1..)),
                )
                .subcommand(
                    Command::new("service-account")
                        .about("Authorize from a service-account key file")
                        .arg(Arg::new("key-file").long("key-file").required(true))
                        .arg(Arg::new("subject").long("subject").help("Impersonate this subject"))
                        .arg(Arg::new("scopes").long("scopes").num_args(1..)),
                )
                .subcommand(Command::new("logout").about("Remove stored credentials"))
                .subcommand(Command::new("status").about("Show credential status"))
                .subcommand(Command::new("profiles").about("List stored profiles"))
                .subcommand(Command::new("diagnose").about("Inspect credential storage")),
        )
        .subcommand(
            Command::new("files")
                .about("File operations")
                .subcommand_required(true)
                .subcommand(
                    Command::new("list")
                        .about("List or search files")
                        .arg(Arg::new("query").long("query").help("Search expression"))
                        .arg(Arg::new("fields").long("fields").help("Field mask"))
                        .arg(
                            Arg::new("page-size")
                                .long("page-size")
                                .value_parser(clap::value_parser!(u32))
                                .default_value("100"),
                        ),
                )
                .subcommand(
                    Command::new("get")
                        .about("Show one file")
                        .arg(Arg::new("file").required(true).help("File id or /path"))
                        .arg(Arg::new("fields").long("fields")),
                )
                .subcommand(
                    Command::new("upload")
                        .about("Upload a local file")
                        .arg(Arg::new("local").required(true))
                        .arg(Arg::new("parent").help("Destination folder id or /path"))
                        .arg(Arg::new("name").long("name").help("Remote name override")),
                )
                .subcommand(
                    Command::new("download")
                        .about("Download a file's content")
                        .arg(Arg::new("file").required(true))
                        .arg(Arg::new("dest").required(true)),
                )
                .subcommand(
                    Command::new("export")
                        .about("Export a native document")
                        .arg(Arg::new("file").required(true))
                        .arg(Arg::new("dest").required(true))
                        .arg(Arg::new("mime").long("mime").required(true)),
                )
                .subcommand(
                    Command::new("delete")
                        .about("Permanently delete a file")
                        .arg(Arg::new("file").required(true)),
                )
                .subcommand(
                    Command::new("copy")
                        .about("Copy a file")
                        .arg(Arg::new("file").required(true))
                        .arg(Arg::new("name").long("name"))
                        .arg(Arg::new("parent").long("parent")),
                )
                .subcommand(
                    Command::new("move")
                        .about("Move a file to another folder")
                        .arg(Arg::new("file").required(true))
                        .arg(Arg::new("parent").required(true)),
                )
                .subcommand(Command::new("trash").about("Move a file to the trash").arg(Arg::new("file").required(true)))
                .subcommand(Command::new("restore").about("Restore from the trash").arg(Arg::new("file").required(true)))
                .subcommand(Command::new("revisions").about("List revisions").arg(Arg::new("file").required(true)))
                .subcommand(Command::new("list-trashed").about("List trashed files"))
                .subcommand(Command::new("export-formats").about("Show supported export formats")),
        )
        .subcommand(
            Command::new("permissions")
                .about("Sharing and access control")
                .subcommand_required(true)
                .subcommand(Command::new("list").arg(Arg::new("file").required(true)))
                .subcommand(
                    Command::new("create")
                        .arg(Arg::new("file").required(true))
                        .arg(Arg::new("role").long("role").required(true))
                        .arg(Arg::new("type").long("type").required(true))
                        .arg(Arg::new("email").long("email"))
                        .arg(Arg::new("domain").long("domain")),
                )
                .subcommand(
                    Command::new("update")
                        .arg(Arg::new("file").required(true))
                        .arg(Arg::new("permission").required(true))
                        .arg(Arg::new("role").long("role").required(true)),
                )
                .subcommand(
                    Command::new("remove")
                        .arg(Arg::new("file").required(true))
                        .arg(Arg::new("permission").required(true)),
                )
                .subcommand(
                    Command::new("create-link")
                        .arg(Arg::new("file").required(true))
                        .arg(Arg::new("role").long("role").default_value("reader")),
                )
                .subcommand(Command::new("audit").arg(Arg::new("file").required(true)))
                .subcommand(Command::new("analyze").arg(Arg::new("file").required(true)))
                .subcommand(Command::new("report").arg(Arg::new("query").long("query")))
                .subcommand(
                    Command::new("bulk")
                        .arg(Arg::new("files").long("files").num_args(1..).required(true))
                        .arg(Arg::new("role").long("role").required(true))
                        .arg(Arg::new("type").long("type").required(true))
                        .arg(Arg::new("email").long("email")),
                )
                .subcommand(Command::new("search").arg(Arg::new("email").long("email").required(true))),
        )
        .subcommand(
            Command::new("drives")
                .about("Shared drives")
                .subcommand_required(true)
                .subcommand(Command::new("list"))
                .subcommand(Command::new("get").arg(Arg::new("drive").required(true))),
        )
        .subcommand(
            Command::new("sheets")
                .about("Spreadsheets")
                .subcommand_required(true)
                .subcommand(Command::new("list"))
                .subcommand(Command::new("create").arg(Arg::new("title").long("title").required(true)))
                .subcommand(Command::new("get").arg(Arg::new("sheet").required(true)))
                .subcommand(
                    Command::new("values")
                        .subcommand_required(true)
                        .subcommand(
                            Command::new("get")
                                .arg(Arg::new("sheet").required(true))
                                .arg(Arg::new("range").required(true)),
                        )
                        .subcommand(
                            Command::new("update")
                                .arg(Arg::new("sheet").required(true))
                                .arg(Arg::new("range").required(true))
                                .arg(Arg::new("values").long("values").required(true).help("JSON array of rows")),
                        )
                        .subcommand(
                            Command::new("append")
                                .arg(Arg::new("sheet").required(true))
                                .arg(Arg::new("range").required(true))
                                .arg(Arg::new("values").long("values").required(true)),
                        )
                        .subcommand(
                            Command::new("clear")
                                .arg(Arg::new("sheet").required(true))
                                .arg(Arg::new("range").required(true)),
                        ),
                )
                .subcommand(
                    Command::new("batch-update")
                        .arg(Arg::new("sheet").required(true))
                        .arg(Arg::new("body").long("body").required(true).help("Raw batch-update JSON")),
                ),
        )
        .subcommand(
            Command::new("docs")
                .about("Documents")
                .subcommand_required(true)
                .subcommand(Command::new("list"))
                .subcommand(Command::new("get").arg(Arg::new("doc").required(true)))
                .subcommand(Command::new("read").arg(Arg::new("doc").required(true)))
                .subcommand(Command::new("create").arg(Arg::new("title").long("title").required(true)))
                .subcommand(
                    Command::new("update")
                        .arg(Arg::new("doc").required(true))
                        .arg(Arg::new("body").long("body").required(true)),
                ),
        )
        .subcommand(
            Command::new("slides")
                .about("Presentations")
                .subcommand_required(true)
                .subcommand(Command::new("list"))
                .subcommand(Command::new("get").arg(Arg::new("presentation").required(true)))
                .subcommand(Command::new("read").arg(Arg::new("presentation").required(true)))
                .subcommand(Command::new("create").arg(Arg::new("title").long("title").required(true)))
                .subcommand(
                    Command::new("update")
                        .arg(Arg::new("presentation").required(true))
                        .arg(Arg::new("body").long("body").required(true)),
                )
                .subcommand(
                    Command::new("replace")
                        .arg(Arg::new("presentation").required(true))
                        .arg(Arg::new("find").long("find").required(true))
                        .arg(Arg::new("replace-with").long("replace-with").required(true)),
                ),
        )
        .subcommand(
            Command::new("admin")
                .about("Directory administration")
                .subcommand_required(true)
                .subcommand(
                    Command::new("users")
                        .subcommand_required(true)
                        .subcommand(Command::new("list").arg(Arg::new("domain").long("domain")))
                        .subcommand(Command::new("get").arg(Arg::new("user").required(true)))
                        .subcommand(Command::new("create").arg(Arg::new("body").long("body").required(true)))
                        .subcommand(
                            Command::new("update")
                                .arg(Arg::new("user").required(true))
                                .arg(Arg::new("body").long("body").required(true)),
                        )
                        .subcommand(Command::new("delete").arg(Arg::new("user").required(true))),
                )
                .subcommand(
                    Command::new("groups")
                        .subcommand_required(true)
                        .subcommand(Command::new("list").arg(Arg::new("domain").long("domain")))
                        .subcommand(Command::new("get").arg(Arg::new("group").required(true)))
                        .subcommand(Command::new("create").arg(Arg::new("body").long("body").required(true)))
                        .subcommand(Command::new("delete").arg(Arg::new("group").required(true))),
                ),
        )
        .subcommand(
            Command::new("changes")
                .about("Change feed")
                .subcommand_required(true)
                .subcommand(Command::new("start-page-token"))
                .subcommand(Command::new("list").arg(Arg::new("token").long("token").required(true)))
                .subcommand(
                    Command::new("watch")
                        .arg(Arg::new("token").long("token"))
                        .arg(
                            Arg::new("interval")
                                .long("interval")
                                .value_parser(clap::value_parser!(u64))
                                .default_value("30"),
                        ),
                )
                .subcommand(
                    Command::new("stop")
                        .arg(Arg::new("channel").long("channel").required(true))
                        .arg(Arg::new("resource").long("resource").required(true)),
                ),
        )
        .subcommand(
            Command::new("labels")
                .about("Drive labels")
                .subcommand_required(true)
                .subcommand(Command::new("list"))
                .subcommand(Command::new("get").arg(Arg::new("label").required(true))),
        )
        .subcommand(
            Command::new("activity")
                .about("Activity feed")
                .subcommand_required(true)
                .subcommand(
                    Command::new("query")
                        .arg(Arg::new("item").long("item"))
                        .arg(Arg::new("folder").long("folder"))
                        .arg(
                            Arg::new("page-size")
                                .long("page-size")
                                .value_parser(clap::value_parser!(u32))
                                .default_value("50"),
                        ),
                ),
        )
        .subcommand(
            Command::new("sync")
                .about("Bidirectional synchronization")
                .subcommand_required(true)
                .allow_external_subcommands(true)
                .subcommand(
                    Command::new("init")
                        .about("Create or update a sync pair")
                        .arg(Arg::new("local").required(true).help("Absolute local root"))
                        .arg(Arg::new("remote").required(true).help("Remote folder id or /path"))
                        .arg(Arg::new("id").long("id").help("Explicit pair id"))
                        .arg(Arg::new("exclude").long("exclude").num_args(1..))
                        .arg(
                            Arg::new("conflict")
                                .long("conflict")
                                .value_parser(["local-wins", "remote-wins", "rename-both"]),
                        )
                        .arg(
                            Arg::new("direction")
                                .long("direction")
                                .value_parser(["push", "pull", "bidirectional"]),
                        ),
                )
                .subcommand(sync_run_args(Command::new("push").about("Push local changes")))
                .subcommand(sync_run_args(Command::new("pull").about("Pull remote changes")))
                .subcommand(sync_run_args(Command::new("status").about("Show pending actions")))
                .subcommand(sync_run_args(Command::new("run").about("Synchronize both directions")))
                .subcommand(Command::new("list").about("List sync pairs"))
                .subcommand(
                    Command::new("remove")
                        .about("Remove a sync pair")
                        .arg(Arg::new("id").required(true)),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("User configuration")
                .subcommand_required(true)
                .subcommand(Command::new("show"))
                .subcommand(
                    Command::new("set")
                        .arg(Arg::new("key").required(true))
                        .arg(Arg::new("value").required(true)),
                )
                .subcommand(Command::new("reset")),
        )
        .subcommand(Command::new("about").about("Account and quota information"))
        .subcommand(Command::new("version").about("Version information"));

    global(command)
}

fn sync_run_args(command: Command) -> Command {
    command
        .arg(Arg::new("id").required(true).help("Sync pair id"))
        .arg(Arg::new("no-delete").long("no-delete").action(ArgAction::SetTrue))
        .arg(Arg::new("full-scan").long("full-scan").action(ArgAction::SetTrue).help("Skip the change feed"))
        .arg(
            Arg::new("concurrency")
                .long("concurrency")
                .value_parser(clap::value_parser!(usize))
                .default_value("5"),
        )
        .arg(Arg::new("stop-on-error").long("stop-on-error").action(ArgAction::SetTrue))
        .arg(
            Arg::new("conflict")
                .long("conflict")
                .value_parser(["local-wins", "remote-wins", "rename-both"]),
        )
}

/// Parses the storage override flag.
pub(crate) fn storage_override(matches: &ArgMatches) -> StorageOverride {
    match matches.get_one::<String>("storage").map(String::as_str) {
        Some("plain") => StorageOverride::ForcePlain,
        Some("encrypted") => StorageOverride::ForceEncrypted,
        _ => StorageOverride::Auto,
    }
}

/// Resolves the output format from flags and configuration.
pub(crate) fn output_format(matches: &ArgMatches, configured: &str) -> OutputFormat {
    if matches.get_flag("json") {
        return OutputFormat::Json;
    }
    matches
        .get_one::<String>("output")
        .map(String::as_str)
        .or(Some(configured))
        .and_then(OutputFormat::parse)
        .unwrap_or_default()
}

/// Routes a parsed invocation to its handler.
///
/// Returns the command label (`verb.noun`) and the envelope payload.
pub async fn dispatch(
    cx: &mut CommandContext,
    matches: &ArgMatches,
) -> (String, AppResult<serde_json::Value>) {
    let Some((noun, sub)) = matches.subcommand() else {
        return (
            String::from("help"),
            Err(AppError::new(ErrorKind::InvalidArgument, "no command given")),
        );
    };
    match noun {
        "auth" => commands::auth::dispatch(cx, sub).await,
        "files" => commands::files::dispatch(cx, sub).await,
        "permissions" => commands::permissions::dispatch(cx, sub).await,
        "drives" => commands::drives::dispatch(cx, sub).await,
        "sheets" => commands::sheets::dispatch(cx, sub).await,
        "docs" => commands::docs::dispatch(cx, sub).await,
        "slides" => commands::slides::dispatch(cx, sub).await,
        "admin" => commands::admin::dispatch(cx, sub).await,
        "changes" => commands::changes::dispatch(cx, sub).await,
        "labels" => commands::labels::dispatch(cx, sub).await,
        "activity" => commands::activity::dispatch(cx, sub).await,
        "sync" => commands::sync::dispatch(cx, sub).await,
        "config" => commands::config_cmd::dispatch(cx, sub).await,
        "about" => (String::from("about"), commands::about::run(cx).await),
        "version" => (String::from("version"), Ok(commands::about::version_payload())),
        other => (
            other.to_owned(),
            Err(AppError::new(
                ErrorKind::InvalidArgument,
                format!("unknown command '{other}'"),
            )),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tree_is_internally_consistent() {
        build_command().debug_assert();
    }

    #[test]
    fn representative_invocations_parse() {
        for line in [
            "gdrv auth login --profile alice --no-browser",
            "gdrv auth service-account --key-file /tmp/key.json --subject user@example.com",
            "gdrv files list --query name='x' --page-size 50 --output table",
            "gdrv files get /docs/report.txt --strict",
            "gdrv files upload ./a.txt /docs --name renamed.txt",
            "gdrv permissions create fileid --role reader --type user --email a@b.c",
            "gdrv sheets values update sheetid A1:B2 --values [[1,2]]",
            "gdrv sync init /tmp/proj folderId=0ABC --id c1 --conflict rename-both",
            "gdrv sync push c1 --no-delete --concurrency 3",
            "gdrv changes watch --interval 10",
            "gdrv config set maxRetries 3",
        ] {
            let args: Vec<&str> = line.split_whitespace().collect();
            build_command()
                .try_get_matches_from(args)
                .unwrap_or_else(|error| panic!("'{line}' should parse: {error}"));
        }
    }

    #[test]
    fn global_flags_reach_nested_subcommands() {
        let matches = build_command()
            .try_get_matches_from([
                "gdrv", "files", "list", "--profile", "work", "--drive-id", "0AD", "--json",
            ])
            .expect("parses");
        assert_eq!(
            matches.get_one::<String>("profile").map(String::as_str),
            Some("work")
        );
        assert!(matches.get_flag("json"));
        assert_eq!(output_format(&matches, "table"), OutputFormat::Json);
    }

    #[test]
    fn storage_override_parses_all_variants() {
        for (flag, expected) in [
            ("auto", StorageOverride::Auto),
            ("encrypted", StorageOverride::ForceEncrypted),
            ("plain", StorageOverride::ForcePlain),
        ] {
            let matches = build_command()
                .try_get_matches_from(["gdrv", "version", "--storage", flag])
                .expect("parses");
            assert_eq!(storage_override(&matches), expected);
        }
    }
}
