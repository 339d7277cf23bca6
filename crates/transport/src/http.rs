//! Authenticated HTTP connection shared by the API wrappers.
//!
//! [`Connection`] owns the `reqwest` client and the bearer token for one
//! command. It normalizes every failure into an [`ApiFailure`] so the retry
//! engine can classify it, and applies [`RequestShape`] decorations.

use std::time::Duration;

use serde::de::DeserializeOwned;

use gdrv_core::{AppError, AppResult, ErrorKind};

use crate::classify::ApiFailure;
use crate::shaper::RequestShape;

/// Authenticated connection for one command.
#[derive(Clone, Debug)]
pub struct Connection {
    http: reqwest::Client,
    access_token: String,
}

impl Connection {
    /// Builds a connection with the configured request timeout.
    pub fn new(access_token: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                AppError::new(
                    ErrorKind::Unknown,
                    format!("failed to build HTTP client: {error}"),
                )
            })?;
        Ok(Self {
            http,
            access_token: access_token.into(),
        })
    }

    /// Wraps an existing client; used by tests.
    #[must_use]
    pub fn from_client(http: reqwest::Client, access_token: impl Into<String>) -> Self {
        Self {
            http,
            access_token: access_token.into(),
        }
    }

    /// Starts a request with bearer authentication attached.
    #[must_use]
    pub fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.access_token)
    }

    /// Applies a [`RequestShape`] to a request builder.
    #[must_use]
    pub fn shaped(
        &self,
        method: reqwest::Method,
        url: &str,
        shape: &RequestShape,
    ) -> reqwest::RequestBuilder {
        let mut builder = self.request(method, url).query(&shape.query);
        for (name, value) in &shape.headers {
            builder = builder.header(name, value);
        }
        builder
    }

    /// Sends the request, normalizing failures into [`ApiFailure`].
    ///
    /// Any non-2xx status (including 3xx, which `reqwest` does not treat as
    /// an error) is converted using the remote error body; 202 passes
    /// through so the caller can start polling.
    pub async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiFailure> {
        let response = builder
            .send()
            .await
            .map_err(|error| ApiFailure::from_reqwest(&error))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = retry_after(response.headers());
        let body = response.bytes().await.unwrap_or_default();
        Err(ApiFailure::from_response(status.as_u16(), retry_after, &body))
    }

    /// Sends the request and decodes a JSON body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ApiFailure> {
        let response = self.send(builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|error| ApiFailure::from_reqwest(&error))
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdrv_core::ErrorKind;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn bearer_token_and_shape_are_applied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header("Authorization", "Bearer token-123"))
            .and(header("X-Goog-Drive-Resource-Keys", "f1/rk1"))
            .and(query_param("supportsAllDrives", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let connection = Connection::new("token-123", Duration::from_secs(5)).expect("client");
        let shape = RequestShape {
            headers: vec![(String::from("X-Goog-Drive-Resource-Keys"), String::from("f1/rk1"))],
            query: vec![(String::from("supportsAllDrives"), String::from("true"))],
        };
        let value: serde_json::Value = connection
            .send_json(connection.shaped(
                reqwest::Method::GET,
                &format!("{}/files", server.uri()),
                &shape,
            ))
            .await
            .expect("success");
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn error_responses_carry_status_reason_and_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "7")
                    .set_body_json(serde_json::json!({
                        "error": {
                            "code": 429,
                            "message": "Too many requests",
                            "errors": [{"reason": "rateLimitExceeded"}],
                        }
                    })),
            )
            .mount(&server)
            .await;

        let connection = Connection::new("token", Duration::from_secs(5)).expect("client");
        let failure = connection
            .send(connection.request(reqwest::Method::GET, &format!("{}/files", server.uri())))
            .await
            .expect_err("rate limited");
        assert_eq!(failure.status, Some(429));
        assert_eq!(failure.reason.as_deref(), Some("rateLimitExceeded"));
        assert_eq!(failure.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(failure.into_app_error().kind(), ErrorKind::RateLimit);
    }
}
