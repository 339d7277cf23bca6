//! Envelope rendering and warning threading.
//!
//! [`OutputWriter`] owns the warnings accumulated over a command's lifetime
//! and renders the final envelope either as JSON (the default) or as a table.
//! Table mode inspects the payload: arrays of flat objects become row tables,
//! a single flat object becomes a key/value listing, and any other shape
//! falls back to JSON so machine consumers never lose data.

use std::io::Write;

use serde_json::Value;
use uuid::Uuid;

use crate::envelope::{Envelope, Warning};
use crate::error::AppError;

/// Requested rendering for the final envelope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
}

impl OutputFormat {
    /// Parses the `--output` flag / `defaultOutputFormat` config value.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "json" => Some(Self::Json),
            "table" => Some(Self::Table),
            _ => None,
        }
    }
}

/// Collects warnings and renders the final envelope for one command.
#[derive(Debug)]
pub struct OutputWriter {
    format: OutputFormat,
    trace_id: Uuid,
    warnings: Vec<Warning>,
}

impl OutputWriter {
    /// Creates a writer with a fresh trace id.
    #[must_use]
    pub fn new(format: OutputFormat) -> Self {
        Self::with_trace_id(format, Uuid::new_v4())
    }

    /// Creates a writer bound to an existing trace id.
    #[must_use]
    pub const fn with_trace_id(format: OutputFormat, trace_id: Uuid) -> Self {
        Self {
            format,
            trace_id,
            warnings: Vec::new(),
        }
    }

    /// Returns the trace id shared with the request context and log records.
    #[must_use]
    pub const fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    /// Records a non-fatal notice for the final envelope.
    pub fn warn(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    /// Returns the warnings recorded so far.
    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Emits a success envelope for `command` wrapping `data`.
    pub fn write_success<W: Write + ?Sized>(
        &mut self,
        out: &mut W,
        command: &str,
        data: Value,
    ) -> std::io::Result<()> {
        let envelope = Envelope::success(
            self.trace_id,
            command,
            data,
            std::mem::take(&mut self.warnings),
        );
        self.render(out, &envelope)
    }

    /// Emits a failure envelope with `data = null` and one structured error.
    pub fn write_error<W: Write + ?Sized>(
        &mut self,
        out: &mut W,
        command: &str,
        error: &AppError,
    ) -> std::io::Result<()> {
        let envelope = Envelope::failure(
            self.trace_id,
            command,
            error,
            std::mem::take(&mut self.warnings),
        );
        // Errors are always machine-readable regardless of the table flag.
        writeln!(out, "{}", serde_json::to_string_pretty(&envelope)?)
    }

    fn render<W: Write + ?Sized>(&self, out: &mut W, envelope: &Envelope) -> std::io::Result<()> {
        match self.format {
            OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(envelope)?),
            OutputFormat::Table => {
                let null = Value::Null;
                let data = envelope.data.as_ref().unwrap_or(&null);
                match render_table(data) {
                    Some(table) => {
                        for warning in &envelope.warnings {
                            writeln!(out, "warning: {} ({})", warning.message, warning.code)?;
                        }
                        out.write_all(table.as_bytes())
                    }
                    None => writeln!(out, "{}", serde_json::to_string_pretty(envelope)?),
                }
            }
        }
    }
}

/// Renders `data` as an aligned text table when its shape permits.
///
/// Supported shapes: an array of flat objects (or an object with exactly one
/// array-of-flat-objects field), and a single flat object rendered as a
/// key/value listing. Returns `None` for anything else.
#[must_use]
pub fn render_table(data: &Value) -> Option<String> {
    let rows_value = match data {
        Value::Array(_) => data,
        Value::Object(map) => {
            let mut arrays = map.values().filter(|v| v.is_array());
            match (arrays.next(), arrays.next()) {
                (Some(only), None) => only,
                _ => return flat_object_listing(data),
            }
        }
        _ => return None,
    };

    let rows = rows_value.as_array()?;
    if rows.is_empty() {
        return Some(String::from("(no rows)\n"));
    }

    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        let object = row.as_object()?;
        for (key, value) in object {
            if scalar_text(value).is_none() {
                return None;
            }
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }

    let mut widths: Vec<usize> = columns.iter().map(String::len).collect();
    let mut cells: Vec<Vec<String>> = Vec::with_capacity(rows.len());
    for row in rows {
        let object = row.as_object()?;
        let mut line = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            let text = object
                .get(column)
                .and_then(scalar_text)
                .unwrap_or_default();
            widths[index] = widths[index].max(text.len());
            line.push(text);
        }
        cells.push(line);
    }

    let mut table = String::new();
    for (index, column) in columns.iter().enumerate() {
        table.push_str(&format!("{:<width$}  ", column.to_uppercase(), width = widths[index]));
    }
    table.push('\n');
    for line in cells {
        for (index, text) in line.iter().enumerate() {
            table.push_str(&format!("{text:<width$}  ", width = widths[index]));
        }
        table.push('\n');
    }
    Some(table)
}

fn flat_object_listing(data: &Value) -> Option<String> {
    let object = data.as_object()?;
    let mut width = 0;
    let mut pairs = Vec::with_capacity(object.len());
    for (key, value) in object {
        let text = scalar_text(value)?;
        width = width.max(key.len());
        pairs.push((key.clone(), text));
    }
    let mut listing = String::new();
    for (key, text) in pairs {
        listing.push_str(&format!("{key:<width$}  {text}\n"));
    }
    Some(listing)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) => Some(text.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}
