//! Retry engine with decorrelated backoff.
//!
//! Every remote call goes through [`execute_with_retry`]. Only `Transient`
//! and `RateLimit` failures are absorbed, and only when the request type is
//! idempotent (list/search, get-by-id, download/export, permission ops) or
//! the caller marks a mutation as idempotent (update, delete-by-id). A
//! create that was already accepted is never replayed.
//!
//! The delay before attempt *n* is `min(cap, base * 2^n) * U(0.5, 1.5)`,
//! with the server's `Retry-After` honoured when it is larger.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use gdrv_core::{AppError, AppResult, ErrorKind, RequestContext};

use crate::classify::{classify, ApiFailure};

/// Retry configuration, sourced from the user config.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts (first try included).
    pub max_attempts: u32,
    /// Base backoff delay.
    pub base_delay: Duration,
    /// Exponential backoff ceiling.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(32),
        }
    }
}

impl RetryPolicy {
    /// Builds a policy from configured values.
    #[must_use]
    pub const fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_secs(32),
        }
    }
}

/// Computes the jittered exponential delay before retry attempt `attempt`.
///
/// The result is `min(cap, base * 2^attempt)` scaled by a uniform factor in
/// `[0.5, 1.5)`.
#[must_use]
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, rng: &mut impl Rng) -> Duration {
    let exponential = policy
        .base_delay
        .saturating_mul(2_u32.saturating_pow(attempt));
    let capped = exponential.min(policy.max_delay);
    let factor = rng.gen_range(0.5..1.5_f64);
    capped.mul_f64(factor)
}

/// Decides whether a failure of `kind` may be retried for this request.
#[must_use]
pub fn may_retry(kind: ErrorKind, ctx: &RequestContext, idempotent_mutation: bool) -> bool {
    if !kind.is_retryable() {
        return false;
    }
    ctx.request_type().is_idempotent() || idempotent_mutation
}

/// Invokes `op` until it succeeds, fails non-retryably, or exhausts the
/// attempt budget. Cancellation is checked before every sleep.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    ctx: &RequestContext,
    idempotent_mutation: bool,
    cancel: &CancellationToken,
    mut op: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiFailure>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0_u32;
    loop {
        if cancel.is_cancelled() {
            return Err(AppError::cancelled());
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(failure) => {
                let kind = classify(&failure);
                let last_attempt = attempt + 1 >= max_attempts;
                if last_attempt || !may_retry(kind, ctx, idempotent_mutation) {
                    return Err(failure.into_app_error());
                }

                let mut delay = backoff_delay(policy, attempt, &mut rand::thread_rng());
                if let Some(server_delay) = failure.retry_after {
                    delay = delay.max(server_delay);
                }
                tracing::warn!(
                    trace_id = %ctx.trace_id(),
                    request_type = ctx.request_type().label(),
                    kind = kind.code(),
                    attempt = attempt + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "retrying remote call"
                );
                tokio::select! {
                    () = cancel.cancelled() => return Err(AppError::cancelled()),
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ConnectionFailure;
    use gdrv_core::RequestType;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> ApiFailure {
        ApiFailure {
            status: Some(503),
            reason: None,
            message: String::from("backend unavailable"),
            retry_after: None,
            connection: None,
        }
    }

    fn not_found() -> ApiFailure {
        ApiFailure {
            status: Some(404),
            reason: None,
            message: String::from("missing"),
            retry_after: None,
            connection: None,
        }
    }

    #[test]
    fn backoff_stays_within_the_jitter_envelope() {
        let policy = RetryPolicy::default();
        let mut rng = rand::thread_rng();
        for attempt in 0..4 {
            let expected = policy
                .base_delay
                .saturating_mul(2_u32.pow(attempt))
                .min(policy.max_delay);
            for _ in 0..50 {
                let delay = backoff_delay(&policy, attempt, &mut rng);
                assert!(delay >= expected.mul_f64(0.5), "attempt {attempt}: {delay:?}");
                assert!(delay <= expected.mul_f64(1.5), "attempt {attempt}: {delay:?}");
            }
        }
    }

    #[test]
    fn backoff_is_capped_at_the_max_delay() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(32),
        };
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let delay = backoff_delay(&policy, 6, &mut rng);
            assert!(delay <= Duration::from_secs(48), "cap * 1.5 bound: {delay:?}");
        }
    }

    #[test]
    fn mutations_are_not_retried_unless_marked_idempotent() {
        let ctx = RequestContext::new("default", RequestType::Mutation);
        assert!(!may_retry(ErrorKind::Transient, &ctx, false));
        assert!(may_retry(ErrorKind::Transient, &ctx, true));

        let list = RequestContext::new("default", RequestType::ListOrSearch);
        assert!(may_retry(ErrorKind::RateLimit, &list, false));
        assert!(!may_retry(ErrorKind::NotFound, &list, false));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let policy = RetryPolicy::default();
        let ctx = RequestContext::new("default", RequestType::GetById);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result = execute_with_retry(&policy, &ctx, false, &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(transient())
                } else {
                    Ok("recovered")
                }
            }
        })
        .await
        .expect("eventually succeeds");
        assert_eq!(result, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_kinds_fail_after_one_attempt() {
        let policy = RetryPolicy::default();
        let ctx = RequestContext::new("default", RequestType::GetById);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let error = execute_with_retry(&policy, &ctx, false, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(not_found()) }
        })
        .await
        .expect_err("fails immediately");
        assert_eq!(error.kind(), ErrorKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn the_attempt_budget_is_honoured() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let ctx = RequestContext::new("default", RequestType::ListOrSearch);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let error = execute_with_retry(&policy, &ctx, false, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(transient()) }
        })
        .await
        .expect_err("budget exhausted");
        assert_eq!(error.kind(), ErrorKind::Transient);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_extends_the_computed_delay() {
        let policy = RetryPolicy::default();
        let ctx = RequestContext::new("default", RequestType::ListOrSearch);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let started = tokio::time::Instant::now();
        let result = execute_with_retry(&policy, &ctx, false, &cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ApiFailure {
                        retry_after: Some(Duration::from_secs(10)),
                        ..transient()
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop_between_attempts() {
        let policy = RetryPolicy::default();
        let ctx = RequestContext::new("default", RequestType::ListOrSearch);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = execute_with_retry(&policy, &ctx, false, &cancel, || async {
            Err::<(), _>(ApiFailure::from_transport(
                ConnectionFailure::Timeout,
                "never reached",
            ))
        })
        .await
        .expect_err("cancelled");
        assert_eq!(error.kind(), ErrorKind::Cancelled);
    }
}
