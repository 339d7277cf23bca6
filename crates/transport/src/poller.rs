//! Long-running operation polling.
//!
//! Some export requests return HTTP 202 with an operation URL in
//! `X-Goog-Upload-URL` or `Location`. The poller checks that operation at a
//! fixed interval until it yields a download URL, fails, or the timeout or
//! the command's cancellation fires.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use gdrv_core::{AppError, AppResult, ErrorKind};

/// Header carrying the operation URL on 202 responses.
pub const UPLOAD_URL_HEADER: &str = "X-Goog-Upload-URL";

/// Polling cadence and deadline.
#[derive(Clone, Copy, Debug)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

/// State reported by one poll of the operation endpoint.
#[derive(Clone, Debug)]
pub enum PollStatus {
    /// Still running; keep polling.
    Pending,
    /// Finished; the payload is ready at the given URL.
    Ready(String),
}

/// Extracts the operation URL from a 202 response's headers.
#[must_use]
pub fn operation_url(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get(UPLOAD_URL_HEADER)
        .or_else(|| headers.get(reqwest::header::LOCATION))
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Polls `check` until it reports [`PollStatus::Ready`].
///
/// `check` is invoked once per interval tick; its errors propagate
/// immediately. The deadline and cancellation are observed between polls.
pub async fn poll_until_ready<F, Fut>(
    config: PollConfig,
    cancel: &CancellationToken,
    mut check: F,
) -> AppResult<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<PollStatus>>,
{
    let poll_loop = async {
        loop {
            match check().await? {
                PollStatus::Ready(url) => return Ok(url),
                PollStatus::Pending => {
                    tracing::debug!(interval_secs = config.interval.as_secs(), "operation pending");
                }
            }
            tokio::time::sleep(config.interval).await;
        }
    };

    tokio::select! {
        () = cancel.cancelled() => Err(AppError::cancelled()),
        outcome = tokio::time::timeout(config.timeout, poll_loop) => match outcome {
            Ok(result) => result,
            Err(_) => Err(AppError::new(
                ErrorKind::Transient,
                format!(
                    "operation did not complete within {} seconds",
                    config.timeout.as_secs()
                ),
            )),
        },
    }
}
