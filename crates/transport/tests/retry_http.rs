//! End-to-end retry behaviour against a mock HTTP server.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gdrv_core::{ErrorKind, RequestContext, RequestType};
use gdrv_transport::{execute_with_retry, Connection, RetryPolicy};

#[tokio::test(start_paused = true)]
async fn three_503s_then_success_yields_the_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/abc"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "abc",
            "name": "report.txt",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let connection = Connection::new("token", Duration::from_secs(5)).expect("client");
    let ctx = RequestContext::new("default", RequestType::GetById);
    let cancel = CancellationToken::new();
    let url = format!("{}/files/abc", server.uri());

    let value: serde_json::Value = execute_with_retry(
        &RetryPolicy::default(),
        &ctx,
        false,
        &cancel,
        || connection.send_json(connection.request(reqwest::Method::GET, &url)),
    )
    .await
    .expect("recovers after three failures");
    assert_eq!(value["name"], "report.txt");
}

#[tokio::test]
async fn a_404_is_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": {"code": 404, "message": "File not found", "errors": [{"reason": "notFound"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let connection = Connection::new("token", Duration::from_secs(5)).expect("client");
    let ctx = RequestContext::new("default", RequestType::GetById);
    let cancel = CancellationToken::new();
    let url = format!("{}/files/missing", server.uri());

    let error = execute_with_retry(
        &RetryPolicy::default(),
        &ctx,
        false,
        &cancel,
        || connection.send_json::<serde_json::Value>(connection.request(reqwest::Method::GET, &url)),
    )
    .await
    .expect_err("not found is terminal");
    assert_eq!(error.kind(), ErrorKind::NotFound);
    assert_eq!(error.http_status(), Some(404));
    assert_eq!(error.remote_reason(), Some("notFound"));
}

#[tokio::test(start_paused = true)]
async fn non_idempotent_mutations_fail_on_the_first_transient_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let connection = Connection::new("token", Duration::from_secs(5)).expect("client");
    let ctx = RequestContext::new("default", RequestType::Mutation);
    let cancel = CancellationToken::new();
    let url = format!("{}/files", server.uri());

    let error = execute_with_retry(
        &RetryPolicy::default(),
        &ctx,
        false,
        &cancel,
        || connection.send_json::<serde_json::Value>(connection.request(reqwest::Method::POST, &url)),
    )
    .await
    .expect_err("create is not replayed");
    assert_eq!(error.kind(), ErrorKind::Transient);
}
