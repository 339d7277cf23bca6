//! User configuration (`config.json`).
//!
//! Values resolve in layers: command-line flags override environment
//! variables, which override this file, which overrides built-in defaults.
//! The file uses camelCase keys so `config show --json` output matches the
//! on-disk shape exactly.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult, ErrorKind};

/// Field-projection presets applied when the caller supplies no mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldsPreset {
    Minimal,
    #[default]
    Standard,
    Full,
}

impl FieldsPreset {
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "minimal" => Some(Self::Minimal),
            "standard" => Some(Self::Standard),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// Verbosity levels accepted by `logLevel`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "quiet" => Some(Self::Quiet),
            "normal" => Some(Self::Normal),
            "verbose" => Some(Self::Verbose),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }
}

/// Contents of `config.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserConfig {
    pub default_profile: String,
    pub default_output_format: String,
    pub default_fields: FieldsPreset,
    /// Path-cache TTL in seconds.
    #[serde(rename = "cacheTTL")]
    pub cache_ttl: u64,
    pub include_export_links: bool,
    /// Retry attempt ceiling, 0..=10.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds, 100..=60000.
    pub retry_base_delay: u64,
    /// Per-request timeout in seconds, 1..=3600.
    pub request_timeout: u64,
    pub log_level: LogLevel,
    pub color_output: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth_client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth_client_secret: Option<String>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            default_profile: String::from("default"),
            default_output_format: String::from("json"),
            default_fields: FieldsPreset::Standard,
            cache_ttl: 300,
            include_export_links: false,
            max_retries: 5,
            retry_base_delay: 500,
            request_timeout: 120,
            log_level: LogLevel::Normal,
            color_output: true,
            oauth_client_id: None,
            oauth_client_secret: None,
        }
    }
}

impl UserConfig {
    /// Loads the configuration file, returning defaults when it is absent.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|error| {
            AppError::new(
                ErrorKind::Unknown,
                format!("failed to read {}: {error}", path.display()),
            )
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|error| {
            AppError::new(
                ErrorKind::InvalidArgument,
                format!("malformed config at {}: {error}", path.display()),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Persists the configuration after validating it.
    pub fn save(&self, path: &Path) -> AppResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// Checks every bounded field against its documented range.
    pub fn validate(&self) -> AppResult<()> {
        if !matches!(self.default_output_format.as_str(), "json" | "table") {
            return Err(invalid("defaultOutputFormat", "must be json or table"));
        }
        if self.max_retries > 10 {
            return Err(invalid("maxRetries", "must be between 0 and 10"));
        }
        if !(100..=60_000).contains(&self.retry_base_delay) {
            return Err(invalid("retryBaseDelay", "must be between 100 and 60000 ms"));
        }
        if !(1..=3600).contains(&self.request_timeout) {
            return Err(invalid("requestTimeout", "must be between 1 and 3600 s"));
        }
        Ok(())
    }

    /// Applies `config set <key> <value>`.
    pub fn set(&mut self, key: &str, value: &str) -> AppResult<()> {
        match key {
            "defaultProfile" => self.default_profile = value.to_owned(),
            "defaultOutputFormat" => self.default_output_format = value.to_owned(),
            "defaultFields" => {
                self.default_fields = FieldsPreset::parse(value)
                    .ok_or_else(|| invalid(key, "must be minimal, standard, or full"))?;
            }
            "cacheTTL" => self.cache_ttl = parse_number(key, value)?,
            "includeExportLinks" => self.include_export_links = parse_bool(key, value)?,
            "maxRetries" => {
                self.max_retries = u32::try_from(parse_number(key, value)?)
                    .map_err(|_| invalid(key, "out of range"))?;
            }
            "retryBaseDelay" => self.retry_base_delay = parse_number(key, value)?,
            "requestTimeout" => self.request_timeout = parse_number(key, value)?,
            "logLevel" => {
                self.log_level = LogLevel::parse(value)
                    .ok_or_else(|| invalid(key, "must be quiet, normal, verbose, or debug"))?;
            }
            "colorOutput" => self.color_output = parse_bool(key, value)?,
            "oauthClientId" => self.oauth_client_id = some_or_none(value),
            "oauthClientSecret" => self.oauth_client_secret = some_or_none(value),
            _ => {
                return Err(AppError::new(
                    ErrorKind::InvalidArgument,
                    format!("unknown config key '{key}'"),
                ));
            }
        }
        self.validate()
    }
}

fn invalid(key: &str, detail: &str) -> AppError {
    AppError::new(ErrorKind::InvalidArgument, format!("config key '{key}' {detail}"))
}

fn parse_number(key: &str, value: &str) -> AppResult<u64> {
    value
        .parse::<u64>()
        .map_err(|_| invalid(key, "expects a non-negative integer"))
}

fn parse_bool(key: &str, value: &str) -> AppResult<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(key, "expects true or false")),
    }
}

fn some_or_none(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        UserConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = UserConfig::load(&temp.path().join("config.json")).expect("load");
        assert_eq!(config.default_profile, "default");
        assert_eq!(config.cache_ttl, 300);
    }

    #[test]
    fn save_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.json");
        let mut config = UserConfig::default();
        config.set("defaultProfile", "alice").expect("set profile");
        config.set("maxRetries", "3").expect("set retries");
        config.save(&path).expect("save");

        let loaded = UserConfig::load(&path).expect("load");
        assert_eq!(loaded.default_profile, "alice");
        assert_eq!(loaded.max_retries, 3);
    }

    #[test]
    fn range_violations_are_rejected() {
        let mut config = UserConfig::default();
        assert!(config.set("maxRetries", "11").is_err());
        assert!(config.set("retryBaseDelay", "50").is_err());
        assert!(config.set("requestTimeout", "0").is_err());
        assert!(config.set("logLevel", "chatty").is_err());
        assert!(config.set("nonsense", "x").is_err());
    }

    #[test]
    fn set_rolls_back_nothing_but_validate_catches_bad_state() {
        let mut config = UserConfig::default();
        // A valid assignment that keeps validate() passing.
        config.set("retryBaseDelay", "1000").expect("in range");
        assert_eq!(config.retry_base_delay, 1000);
    }
}
