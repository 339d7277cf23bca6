//! Loopback OAuth flow with PKCE.
//!
//! The loopback flow binds `127.0.0.1:0`, sends the operator's browser to the
//! consent endpoint with a `S256` code challenge, and serves a single
//! `/callback` request to capture the authorization code. The manual
//! fallback constructs the same URL against a reserved ephemeral port and
//! reads the pasted code from the operator instead.
//!
//! # Invariants
//!
//! - The PKCE verifier is 43–128 base64url characters without padding, so it
//!   never contains `+`, `/`, or `=`.
//! - `code_challenge = BASE64URL(SHA-256(verifier))`.
//! - The `state` parameter is 32 random bytes and is compared in constant
//!   time.
//! - Waiting for the callback observes a five-minute deadline and the
//!   command's cancellation token.

use std::net::SocketAddr;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use url::Url;

use gdrv_core::{AppError, AppResult, ErrorKind};

use crate::client::OAuthClient;

/// Deadline for the browser round trip.
pub const WAIT_FOR_CODE_TIMEOUT: Duration = Duration::from_secs(300);

/// Consent endpoint used when none is configured.
pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Token endpoint used when none is configured.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Device-authorization endpoint used when none is configured.
pub const DEFAULT_DEVICE_URL: &str = "https://oauth2.googleapis.com/device/code";

/// OAuth endpoint set; tests point these at a mock server.
#[derive(Clone, Debug)]
pub struct AuthEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub device_url: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_owned(),
            token_url: DEFAULT_TOKEN_URL.to_owned(),
            device_url: DEFAULT_DEVICE_URL.to_owned(),
        }
    }
}

/// PKCE verifier/challenge pair.
#[derive(Clone, Debug)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    /// Generates a fresh pair from 64 random bytes.
    #[must_use]
    pub fn generate() -> Self {
        let mut raw = [0_u8; 64];
        rand::rngs::OsRng.fill_bytes(&mut raw);
        let verifier = URL_SAFE_NO_PAD.encode(raw);
        Self::from_verifier(verifier)
    }

    /// Derives the challenge for an existing verifier.
    #[must_use]
    pub fn from_verifier(verifier: String) -> Self {
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(digest);
        Self { verifier, challenge }
    }
}

/// Generates the random `state` parameter.
#[must_use]
pub fn generate_state() -> String {
    let mut raw = [0_u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    URL_SAFE_NO_PAD.encode(raw)
}

/// Compares two state values without early exit.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0_u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Builds the consent URL for either the loopback or the manual flow.
pub fn build_consent_url(
    auth_url: &str,
    client: &OAuthClient,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
    pkce: &Pkce,
) -> AppResult<Url> {
    let mut url = Url::parse(auth_url).map_err(|error| {
        AppError::new(ErrorKind::Unknown, format!("invalid auth endpoint: {error}"))
    })?;
    url.query_pairs_mut()
        .append_pair("client_id", &client.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &scopes.join(" "))
        .append_pair("state", state)
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");
    Ok(url)
}

/// Successful token-endpoint response.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Splits the space-separated scope string.
    #[must_use]
    pub fn granted_scopes(&self, requested: &[String]) -> Vec<String> {
        self.scope.as_deref().map_or_else(
            || requested.to_vec(),
            |scope| scope.split_whitespace().map(str::to_owned).collect(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchanges an authorization code for tokens.
pub async fn exchange_code(
    http: &reqwest::Client,
    token_url: &str,
    client: &OAuthClient,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
) -> AppResult<TokenResponse> {
    let mut form = vec![
        ("client_id", client.client_id.as_str()),
        ("code", code),
        ("code_verifier", verifier),
        ("grant_type", "authorization_code"),
        ("redirect_uri", redirect_uri),
    ];
    if let Some(secret) = client.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }
    post_token_form(http, token_url, &form).await
}

/// Exchanges a refresh token for a new access token.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    token_url: &str,
    client: &OAuthClient,
    refresh_token: &str,
) -> AppResult<TokenResponse> {
    let mut form = vec![
        ("client_id", client.client_id.as_str()),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ];
    if let Some(secret) = client.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }
    post_token_form(http, token_url, &form).await
}

pub(crate) async fn post_token_form(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> AppResult<TokenResponse> {
    let response = http
        .post(token_url)
        .form(form)
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
        return serde_json::from_slice(&body).map_err(|error| {
            AppError::new(
                ErrorKind::Unknown,
                format!("malformed token response: {error}"),
            )
        });
    }
    let detail = serde_json::from_slice::<TokenErrorBody>(&body).map_or_else(
        |_| String::from("token endpoint rejected the request"),
        |body| {
            body.error_description
                .map_or_else(|| body.error.clone(), |text| format!("{}: {text}", body.error))
        },
    );
    let kind = if status.as_u16() == 401 || status.as_u16() == 400 {
        ErrorKind::AuthExpired
    } else {
        ErrorKind::Transient
    };
    Err(AppError::new(kind, detail).with_status(status.as_u16()))
}

/// Outcome of serving the loopback callback.
#[derive(Debug)]
pub struct CallbackCode {
    pub code: String,
}

/// Binds the loopback listener for the callback server.
///
/// Failure here (sandboxes, exhausted ports) triggers the manual fallback.
pub async fn bind_loopback() -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

/// Serves `/callback` until a code arrives, the deadline passes, or the
/// command is cancelled.
pub async fn wait_for_code(
    listener: TcpListener,
    expected_state: &str,
    cancel: &CancellationToken,
) -> AppResult<CallbackCode> {
    let serve = async {
        loop {
            let (mut stream, _) = listener.accept().await.map_err(|error| {
                AppError::new(
                    ErrorKind::NetworkError,
                    format!("callback listener failed: {error}"),
                )
            })?;
            let mut raw = vec![0_u8; 8192];
            let read = stream.read(&mut raw).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&raw[..read]).into_owned();
            match parse_callback(&request, expected_state) {
                CallbackParse::Code(code) => {
                    respond(&mut stream, 200, "Authentication complete. You may close this tab.")
                        .await;
                    return Ok(CallbackCode { code });
                }
                CallbackParse::Denied(reason) => {
                    respond(&mut stream, 200, "Authorization was denied.").await;
                    return Err(AppError::new(
                        ErrorKind::PermissionDenied,
                        format!("authorization denied: {reason}"),
                    ));
                }
                CallbackParse::BadState => {
                    respond(&mut stream, 400, "State mismatch.").await;
                    return Err(AppError::new(
                        ErrorKind::Unknown,
                        "OAuth state mismatch on callback",
                    ));
                }
                CallbackParse::NotCallback => {
                    // Browsers probe /favicon.ico and similar; keep serving.
                    respond(&mut stream, 404, "Not found.").await;
                }
            }
        }
    };

    tokio::select! {
        () = cancel.cancelled() => Err(AppError::cancelled()),
        outcome = tokio::time::timeout(WAIT_FOR_CODE_TIMEOUT, serve) => match outcome {
            Ok(result) => result,
            Err(_) => Err(AppError::new(
                ErrorKind::AuthRequired,
                "timed out waiting for the browser callback; re-run 'gdrv auth login'",
            )),
        },
    }
}

enum CallbackParse {
    Code(String),
    Denied(String),
    BadState,
    NotCallback,
}

fn parse_callback(request: &str, expected_state: &str) -> CallbackParse {
    let Some(first_line) = request.lines().next() else {
        return CallbackParse::NotCallback;
    };
    let mut parts = first_line.split_whitespace();
    let (Some("GET"), Some(target)) = (parts.next(), parts.next()) else {
        return CallbackParse::NotCallback;
    };
    if !target.starts_with("/callback") {
        return CallbackParse::NotCallback;
    }
    let Ok(url) = Url::parse(&format!("http://127.0.0.1{target}")) else {
        return CallbackParse::NotCallback;
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(reason) = error {
        return CallbackParse::Denied(reason);
    }
    let Some(state) = state else {
        return CallbackParse::BadState;
    };
    if !constant_time_eq(&state, expected_state) {
        return CallbackParse::BadState;
    }
    code.map_or(CallbackParse::BadState, CallbackParse::Code)
}

async fn respond(stream: &mut tokio::net::TcpStream, status: u16, body: &str) {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        _ => "Not Found",
    };
    let payload = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n<html><body><p>{body}</p></body></html>",
        body.len() + 33
    );
    let _ = stream.write_all(payload.as_bytes()).await;
    let _ = stream.shutdown().await;
}
