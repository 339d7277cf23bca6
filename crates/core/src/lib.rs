//! # Overview
//!
//! `gdrv-core` holds the shared foundation of the gdrv workspace: the closed
//! error taxonomy with its exit-code mapping, the machine-readable output
//! envelope and its writer, the per-command request context, the user
//! configuration, and the config-directory layout.
//!
//! # Design
//!
//! - [`error::ErrorKind`] is the single classification every failure in the
//!   workspace collapses into; [`error::AppError`] carries the classified
//!   kind plus HTTP status, remote reason token, and a diagnostic context
//!   map into the envelope.
//! - [`envelope::Envelope`] is the one shape every command prints on stdout.
//!   [`output::OutputWriter`] threads warnings through a command's lifetime
//!   and renders JSON or tabular output.
//! - [`context::RequestContext`] replaces global flag structs: one context
//!   per command, threaded through every subsystem, constructed directly by
//!   tests.
//!
//! # Invariants
//!
//! - An envelope carries `data` XOR a single error.
//! - `ErrorKind::exit_code` is the only source of process exit codes.
//! - All on-disk artifacts live under the [`paths::ConfigDir`] layout with
//!   0700 directories and 0600 files on Unix.

pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod output;
pub mod paths;

pub use config::{FieldsPreset, LogLevel, UserConfig};
pub use context::{RequestContext, RequestType};
pub use envelope::{Envelope, EnvelopeError, Severity, Warning, SCHEMA_VERSION};
pub use error::{AppError, AppResult, ErrorKind};
pub use output::{OutputFormat, OutputWriter};
pub use paths::ConfigDir;
