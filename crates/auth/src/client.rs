//! OAuth client resolution and headless-environment detection.
//!
//! The client identity resolves in priority order: explicit flags, the
//! `GDRV_CLIENT_ID`/`GDRV_CLIENT_SECRET` environment variables, the config
//! file, and finally the client bundled at build time. Setting
//! `GDRV_REQUIRE_CUSTOM_OAUTH` forbids the bundled fallback.

use gdrv_core::{AppError, AppResult, ErrorKind, UserConfig};

/// Environment variable naming the OAuth client id.
pub const ENV_CLIENT_ID: &str = "GDRV_CLIENT_ID";
/// Environment variable naming the OAuth client secret.
pub const ENV_CLIENT_SECRET: &str = "GDRV_CLIENT_SECRET";
/// When set, the bundled client may not be used.
pub const ENV_REQUIRE_CUSTOM: &str = "GDRV_REQUIRE_CUSTOM_OAUTH";
/// When set, browser launching is suppressed and the environment is treated
/// as headless.
pub const ENV_NO_BROWSER: &str = "GDRV_NO_BROWSER";

/// Resolved OAuth client identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl OAuthClient {
    /// Returns the secret or fails with [`ErrorKind::AuthClientPartial`].
    pub fn require_secret(&self) -> AppResult<&str> {
        self.client_secret.as_deref().ok_or_else(|| {
            AppError::new(
                ErrorKind::AuthClientPartial,
                "an OAuth client secret is required for this flow but only a client id was supplied",
            )
        })
    }
}

/// Resolves the OAuth client from the standard sources.
pub fn resolve_client(
    flag_id: Option<&str>,
    flag_secret: Option<&str>,
    config: &UserConfig,
) -> AppResult<OAuthClient> {
    resolve_client_with(flag_id, flag_secret, config, |name| {
        std::env::var(name).ok()
    }, bundled_client())
}

/// Resolution core with injectable environment, used directly by tests.
pub fn resolve_client_with(
    flag_id: Option<&str>,
    flag_secret: Option<&str>,
    config: &UserConfig,
    env: impl Fn(&str) -> Option<String>,
    bundled: Option<OAuthClient>,
) -> AppResult<OAuthClient> {
    if let Some(id) = non_empty(flag_id.map(str::to_owned)) {
        return Ok(OAuthClient {
            client_id: id,
            client_secret: non_empty(flag_secret.map(str::to_owned)),
        });
    }
    if flag_secret.is_some() {
        return Err(partial("a client secret flag without a client id"));
    }

    let env_id = non_empty(env(ENV_CLIENT_ID));
    let env_secret = non_empty(env(ENV_CLIENT_SECRET));
    match (env_id, env_secret) {
        (Some(id), secret) => {
            return Ok(OAuthClient {
                client_id: id,
                client_secret: secret,
            });
        }
        (None, Some(_)) => {
            return Err(partial(&format!("{ENV_CLIENT_SECRET} without {ENV_CLIENT_ID}")));
        }
        (None, None) => {}
    }

    let cfg_id = non_empty(config.oauth_client_id.clone());
    let cfg_secret = non_empty(config.oauth_client_secret.clone());
    match (cfg_id, cfg_secret) {
        (Some(id), secret) => {
            return Ok(OAuthClient {
                client_id: id,
                client_secret: secret,
            });
        }
        (None, Some(_)) => {
            return Err(partial("oauthClientSecret without oauthClientId in config"));
        }
        (None, None) => {}
    }

    if env(ENV_REQUIRE_CUSTOM).is_some() {
        return Err(AppError::new(
            ErrorKind::AuthClientMissing,
            format!("{ENV_REQUIRE_CUSTOM} is set and no custom OAuth client is configured"),
        ));
    }
    bundled.ok_or_else(|| {
        AppError::new(
            ErrorKind::AuthClientMissing,
            "no OAuth client configured; supply --client-id or set GDRV_CLIENT_ID",
        )
    })
}

/// The client compiled in at build time, when the build provided one.
#[must_use]
pub fn bundled_client() -> Option<OAuthClient> {
    let id = option_env!("GDRV_BUNDLED_CLIENT_ID")?;
    Some(OAuthClient {
        client_id: id.to_owned(),
        client_secret: option_env!("GDRV_BUNDLED_CLIENT_SECRET").map(str::to_owned),
    })
}

/// Detects whether the environment cannot open a browser.
///
/// `GDRV_NO_BROWSER` forces headless regardless of any display variables.
#[must_use]
pub fn is_headless() -> bool {
    is_headless_with(|name| std::env::var(name).ok(), std::env::consts::OS)
}

/// Detection core with injectable environment, used directly by tests.
#[must_use]
pub fn is_headless_with(env: impl Fn(&str) -> Option<String>, os: &str) -> bool {
    if env(ENV_NO_BROWSER).is_some() {
        return true;
    }
    for indicator in ["CI", "GITHUB_ACTIONS", "SSH_CONNECTION", "SSH_TTY"] {
        if env(indicator).is_some() {
            return true;
        }
    }
    if os != "windows" && os != "macos" {
        return env("DISPLAY").is_none() && env("WAYLAND_DISPLAY").is_none();
    }
    false
}

fn partial(detail: &str) -> AppError {
    AppError::new(
        ErrorKind::AuthClientPartial,
        format!("incomplete OAuth client configuration: {detail}"),
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn flags_take_priority_over_everything() {
        let mut config = UserConfig::default();
        config.oauth_client_id = Some(String::from("config-id"));
        let client = resolve_client_with(
            Some("flag-id"),
            Some("flag-secret"),
            &config,
            env_of(&[(ENV_CLIENT_ID, "env-id")]),
            None,
        )
        .expect("resolve");
        assert_eq!(client.client_id, "flag-id");
        assert_eq!(client.client_secret.as_deref(), Some("flag-secret"));
    }

    #[test]
    fn env_beats_config() {
        let mut config = UserConfig::default();
        config.oauth_client_id = Some(String::from("config-id"));
        let client = resolve_client_with(
            None,
            None,
            &config,
            env_of(&[(ENV_CLIENT_ID, "env-id")]),
            None,
        )
        .expect("resolve");
        assert_eq!(client.client_id, "env-id");
    }

    #[test]
    fn bundled_client_is_the_last_resort() {
        let config = UserConfig::default();
        let bundled = OAuthClient {
            client_id: String::from("bundled-id"),
            client_secret: Some(String::from("bundled-secret")),
        };
        let client = resolve_client_with(None, None, &config, env_of(&[]), Some(bundled))
            .expect("resolve");
        assert_eq!(client.client_id, "bundled-id");
    }

    #[test]
    fn require_custom_forbids_the_bundled_fallback() {
        let config = UserConfig::default();
        let bundled = OAuthClient {
            client_id: String::from("bundled-id"),
            client_secret: None,
        };
        let error = resolve_client_with(
            None,
            None,
            &config,
            env_of(&[(ENV_REQUIRE_CUSTOM, "1")]),
            Some(bundled),
        )
        .expect_err("must fail");
        assert_eq!(error.kind(), ErrorKind::AuthClientMissing);
    }

    #[test]
    fn secret_without_id_is_partial() {
        let config = UserConfig::default();
        let error = resolve_client_with(
            None,
            None,
            &config,
            env_of(&[(ENV_CLIENT_SECRET, "orphan")]),
            None,
        )
        .expect_err("must fail");
        assert_eq!(error.kind(), ErrorKind::AuthClientPartial);
    }

    #[test]
    fn nothing_configured_is_client_missing() {
        let config = UserConfig::default();
        let error =
            resolve_client_with(None, None, &config, env_of(&[]), None).expect_err("must fail");
        assert_eq!(error.kind(), ErrorKind::AuthClientMissing);
    }

    #[test]
    fn display_present_is_not_headless() {
        assert!(!is_headless_with(env_of(&[("DISPLAY", ":0")]), "linux"));
    }

    #[test]
    fn no_browser_overrides_display() {
        assert!(is_headless_with(
            env_of(&[("DISPLAY", ":0"), (ENV_NO_BROWSER, "1")]),
            "linux"
        ));
    }

    #[test]
    fn ci_indicators_force_headless() {
        assert!(is_headless_with(env_of(&[("CI", "true"), ("DISPLAY", ":0")]), "linux"));
        assert!(is_headless_with(
            env_of(&[("SSH_CONNECTION", "10.0.0.1"), ("DISPLAY", ":0")]),
            "linux"
        ));
    }

    #[test]
    fn missing_display_on_linux_is_headless_but_not_on_windows() {
        assert!(is_headless_with(env_of(&[]), "linux"));
        assert!(!is_headless_with(env_of(&[]), "windows"));
        assert!(!is_headless_with(env_of(&[]), "macos"));
    }
}
