//! Device-authorization flow (RFC 8628).
//!
//! The client requests a device code, displays the user code and
//! verification URL, and polls the token endpoint at the server-advised
//! interval. `authorization_pending` keeps polling, `slow_down` widens the
//! interval, and `access_denied` / `expired_token` surface as specific
//! errors. The interval never drops below five seconds.

use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use gdrv_core::{AppError, AppResult, ErrorKind};

use crate::client::OAuthClient;
use crate::oauth::TokenResponse;

/// Server-advised polling intervals are clamped to at least this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Added to the interval on every `slow_down` response.
pub const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Response from the device-authorization endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    #[serde(alias = "verification_uri")]
    pub verification_url: String,
    /// Seconds until the device code expires.
    pub expires_in: i64,
    /// Server-advised polling interval in seconds.
    #[serde(default)]
    pub interval: Option<u64>,
}

impl DeviceCodeResponse {
    /// Returns the advised interval clamped to the five-second floor.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        let advised = Duration::from_secs(self.interval.unwrap_or(5));
        advised.max(MIN_POLL_INTERVAL)
    }
}

#[derive(Debug, Deserialize)]
struct PollErrorBody {
    error: String,
}

/// One poll outcome, decoded from the token endpoint.
#[derive(Debug)]
pub enum PollOutcome {
    Granted(Box<TokenResponse>),
    Pending,
    SlowDown,
}

/// Decides how the polling loop reacts to a non-success error token.
///
/// Pure so the state machine is testable without a server: returns the next
/// interval for retryable states and an error for terminal ones.
pub fn next_interval(current: Duration, error_token: &str) -> AppResult<Option<Duration>> {
    match error_token {
        "authorization_pending" => Ok(Some(current)),
        "slow_down" => Ok(Some((current + SLOW_DOWN_STEP).max(MIN_POLL_INTERVAL))),
        token => Err(terminal_error(token)),
    }
}

fn terminal_error(token: &str) -> AppError {
    match token {
        "access_denied" => AppError::new(
            ErrorKind::PermissionDenied,
            "the operator denied the device authorization request",
        ),
        "expired_token" => AppError::new(
            ErrorKind::AuthRequired,
            "the device code expired before authorization; re-run 'gdrv auth device'",
        ),
        other => AppError::new(
            ErrorKind::Unknown,
            format!("device authorization failed: {other}"),
        ),
    }
}

/// Requests a device code for `scopes`.
pub async fn request_device_code(
    http: &reqwest::Client,
    device_url: &str,
    client: &OAuthClient,
    scopes: &[String],
) -> AppResult<DeviceCodeResponse> {
    let scope = scopes.join(" ");
    let form = [
        ("client_id", client.client_id.as_str()),
        ("scope", scope.as_str()),
    ];
    let response = http
        .post(device_url)
        .form(&form)
        .send()
        .await
        .map_err(|error| {
            AppError::new(
                ErrorKind::NetworkError,
                format!("device endpoint unreachable: {error}"),
            )
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::new(
            ErrorKind::Transient,
            "device endpoint rejected the request",
        )
        .with_status(status.as_u16()));
    }
    response.json().await.map_err(|error| {
        AppError::new(
            ErrorKind::Unknown,
            format!("malformed device code response: {error}"),
        )
    })
}

/// Polls the token endpoint until the grant is resolved.
///
/// The loop sleeps `interval` between polls, adjusts on `slow_down`, and
/// stops on cancellation, terminal errors, or device-code expiry.
pub async fn poll_for_token(
    http: &reqwest::Client,
    token_url: &str,
    client: &OAuthClient,
    device: &DeviceCodeResponse,
    cancel: &CancellationToken,
) -> AppResult<TokenResponse> {
    let mut interval = device.poll_interval();
    let deadline = tokio::time::Instant::now()
        + Duration::from_secs(u64::try_from(device.expires_in.max(0)).unwrap_or(0));

    loop {
        tokio::select! {
            () = cancel.cancelled() => return Err(AppError::cancelled()),
            () = tokio::time::sleep(interval) => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(AppError::new(
                ErrorKind::AuthRequired,
                "the device code expired before authorization; re-run 'gdrv auth device'",
            ));
        }

        match poll_once(http, token_url, client, &device.device_code).await? {
            PollOutcome::Granted(token) => return Ok(*token),
            PollOutcome::Pending => {}
            PollOutcome::SlowDown => {
                interval = (interval + SLOW_DOWN_STEP).max(MIN_POLL_INTERVAL);
                tracing::debug!(interval_secs = interval.as_secs(), "device poll slowed down");
            }
        }
    }
}

async fn poll_once(
    http: &reqwest::Client,
    token_url: &str,
    client: &OAuthClient,
    device_code: &str,
) -> AppResult<PollOutcome> {
    let mut form = vec![
        ("client_id", client.client_id.as_str()),
        ("device_code", device_code),
        ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
    ];
    if let Some(secret) = client.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }
    let response = http
        .post(token_url)
        .form(&form)
        .send()
        .await
        .map_err(|error| {
            AppError::new(
                ErrorKind::NetworkError,
                format!("token endpoint unreachable: {error}"),
            )
        })?;
    let status = response.status();
    let body = response.bytes().await.map_err(|error| {
        AppError::new(
            ErrorKind::NetworkError,
            format!("token endpoint response truncated: {error}"),
        )
    })?;

    if status.is_success() {
        let token: TokenResponse = serde_json::from_slice(&body).map_err(|error| {
            AppError::new(
                ErrorKind::Unknown,
                format!("malformed token response: {error}"),
            )
        })?;
        return Ok(PollOutcome::Granted(Box::new(token)));
    }

    let Ok(error_body) = serde_json::from_slice::<PollErrorBody>(&body) else {
        return Err(AppError::new(
            ErrorKind::Transient,
            "token endpoint returned an unreadable error",
        )
        .with_status(status.as_u16()));
    };
    match error_body.error.as_str() {
        "authorization_pending" => Ok(PollOutcome::Pending),
        "slow_down" => Ok(PollOutcome::SlowDown),
        token => Err(terminal_error(token)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(interval: Option<u64>) -> DeviceCodeResponse {
        DeviceCodeResponse {
            device_code: String::from("dev-code"),
            user_code: String::from("ABCD-EFGH"),
            verification_url: String::from("https://example.com/device"),
            expires_in: 1800,
            interval,
        }
    }

    #[test]
    fn poll_interval_has_a_five_second_floor() {
        assert_eq!(device(Some(1)).poll_interval(), Duration::from_secs(5));
        assert_eq!(device(Some(8)).poll_interval(), Duration::from_secs(8));
        assert_eq!(device(None).poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn pending_keeps_the_current_interval() {
        let next = next_interval(Duration::from_secs(7), "authorization_pending")
            .expect("retryable")
            .expect("interval");
        assert_eq!(next, Duration::from_secs(7));
    }

    #[test]
    fn slow_down_widens_the_interval() {
        let next = next_interval(Duration::from_secs(5), "slow_down")
            .expect("retryable")
            .expect("interval");
        assert_eq!(next, Duration::from_secs(10));
    }

    #[test]
    fn denial_and_expiry_are_terminal() {
        let denied = next_interval(Duration::from_secs(5), "access_denied").expect_err("terminal");
        assert_eq!(denied.kind(), ErrorKind::PermissionDenied);

        let expired = next_interval(Duration::from_secs(5), "expired_token").expect_err("terminal");
        assert_eq!(expired.kind(), ErrorKind::AuthRequired);
    }

    #[test]
    fn verification_uri_alias_is_accepted() {
        let parsed: DeviceCodeResponse = serde_json::from_str(
            r#"{"device_code":"d","user_code":"u","verification_uri":"https://v","expires_in":900,"interval":5}"#,
        )
        .expect("parse");
        assert_eq!(parsed.verification_url, "https://v");
    }
}
