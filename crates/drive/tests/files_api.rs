//! Files API behaviour against a mock platform endpoint.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gdrv_core::{ErrorKind, FieldsPreset, RequestContext, RequestType};
use gdrv_drive::files::FilesApi;
use gdrv_drive::{ApiContext, Endpoints};
use gdrv_transport::{Connection, ResourceKeys, RetryPolicy};

fn api_context(server: &MockServer) -> Arc<ApiContext> {
    Arc::new(ApiContext {
        connection: Connection::new("test-token", Duration::from_secs(5)).expect("client"),
        retry: RetryPolicy::default(),
        resource_keys: ResourceKeys::new(),
        preset: FieldsPreset::Standard,
        cancel: CancellationToken::new(),
        endpoints: Endpoints {
            drive: server.uri(),
            upload: format!("{}/upload", server.uri()),
            ..Endpoints::default()
        },
    })
}

#[tokio::test]
async fn list_follows_pagination_and_caches_resource_keys() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [{"id": "b", "name": "second.txt", "mimeType": "text/plain"}],
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [{
                "id": "a",
                "name": "first.txt",
                "mimeType": "text/plain",
                "resourceKey": "rk-a",
            }],
            "nextPageToken": "page-2",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = api_context(&server);
    let req_ctx = RequestContext::new("default", RequestType::ListOrSearch);
    let files = FilesApi::new(&ctx)
        .list(&req_ctx, None, None, 100)
        .await
        .expect("both pages");
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].id, "a");
    assert_eq!(files[1].id, "b");
    // Resource keys observed on listings feed later request shaping.
    assert_eq!(ctx.resource_keys.get("a").as_deref(), Some("rk-a"));
    // The default shape was applied.
    assert!(req_ctx
        .recorded_shapes()
        .iter()
        .any(|s| s == "supportsAllDrives=true"));
}

#[tokio::test]
async fn get_missing_file_classifies_as_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/ghost"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": {"code": 404, "message": "File not found: ghost", "errors": [{"reason": "notFound"}]}
        })))
        .mount(&server)
        .await;

    let ctx = api_context(&server);
    let req_ctx = RequestContext::new("default", RequestType::GetById);
    let error = FilesApi::new(&ctx)
        .get(&req_ctx, "ghost", None)
        .await
        .expect_err("missing");
    assert_eq!(error.kind(), ErrorKind::NotFound);
    assert_eq!(error.http_status(), Some(404));
}

#[tokio::test]
async fn oversized_export_carries_the_export_links() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/big/export"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": {
                "code": 403,
                "message": "This file is too large to be exported.",
                "errors": [{"reason": "exportSizeLimitExceeded"}],
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/big"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "big",
            "name": "huge-report",
            "mimeType": "application/vnd.google-apps.document",
            "exportLinks": {"application/pdf": "https://export.example/big.pdf"},
        })))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir");
    let ctx = api_context(&server);
    let req_ctx = RequestContext::new("default", RequestType::DownloadOrExport);
    let error = FilesApi::new(&ctx)
        .export(&req_ctx, "big", "application/pdf", &temp.path().join("out.pdf"))
        .await
        .expect_err("size limited");
    assert_eq!(error.kind(), ErrorKind::ExportSizeLimit);
    let links = error.context().get("exportLinks").expect("links attached");
    assert_eq!(links["application/pdf"], "https://export.example/big.pdf");
}

#[tokio::test]
async fn upload_sends_multipart_related_with_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/files"))
        .and(query_param("uploadType", "multipart"))
        .and(header_exists("Content-Type"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "new-id",
            "name": "upload.bin",
            "mimeType": "application/octet-stream",
            "md5Checksum": "abc",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir");
    let local = temp.path().join("upload.bin");
    std::fs::write(&local, b"binary payload").expect("write");

    let ctx = api_context(&server);
    let req_ctx = RequestContext::new("default", RequestType::Mutation);
    let file = FilesApi::new(&ctx)
        .upload(&req_ctx, &local, "upload.bin", Some("parent-id"), None)
        .await
        .expect("upload");
    assert_eq!(file.id, "new-id");

    let requests = server.received_requests().await.expect("recorded");
    let upload = requests
        .iter()
        .find(|request| request.url.path() == "/upload/files")
        .expect("upload request");
    let body = String::from_utf8_lossy(&upload.body);
    assert!(body.contains("\"name\":\"upload.bin\""));
    assert!(body.contains("\"parents\":[\"parent-id\"]"));
    assert!(body.contains("binary payload"));
}
