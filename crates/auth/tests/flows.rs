//! HTTP-facing auth flow tests against a mock token service.

use std::collections::BTreeSet;

use tempfile::tempdir;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gdrv_auth::oauth::AuthEndpoints;
use gdrv_auth::{
    client_id_hash, storage_key, AuthManager, AuthOptions, Credential, CredentialType,
    OAuthClient, StorageOverride,
};
use gdrv_core::{ConfigDir, ErrorKind};

fn manager(temp: &tempfile::TempDir, token_url: String, device_url: String) -> AuthManager {
    AuthManager::new(
        ConfigDir::at(temp.path().join("gdrv")),
        OAuthClient {
            client_id: String::from("X.apps.googleusercontent.com"),
            client_secret: Some(String::from("secret")),
        },
        StorageOverride::ForceEncrypted,
    )
    .expect("manager")
    .with_endpoints(AuthEndpoints {
        auth_url: String::from("https://accounts.example.com/auth"),
        token_url,
        device_url,
    })
}

fn user_credential(expiry: OffsetDateTime) -> Credential {
    Credential {
        access_token: String::from("stale-token"),
        refresh_token: Some(String::from("refresh-token")),
        expiry,
        scopes: BTreeSet::from([String::from("https://www.googleapis.com/auth/drive")]),
        credential_type: CredentialType::UserOauth,
        client_id: String::from("X.apps.googleusercontent.com"),
        service_account_email: None,
        impersonated_subject: None,
    }
}

#[tokio::test]
async fn refresh_inside_buffer_replaces_and_persists_the_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh-token",
            "expires_in": 3600,
            "scope": "https://www.googleapis.com/auth/drive",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp = tempdir().expect("tempdir");
    let manager = manager(&temp, format!("{}/token", server.uri()), String::new());
    let expiring_soon = OffsetDateTime::now_utc() + time::Duration::minutes(3);
    manager
        .save_credentials("alice", &user_credential(expiring_soon))
        .expect("save");

    let refreshed = manager
        .get_valid_credentials("alice")
        .await
        .expect("refresh succeeds");
    assert_eq!(refreshed.access_token, "fresh-token");

    // The refreshed record was saved, not just returned.
    let reloaded = manager.load_credentials("alice").expect("reload");
    assert_eq!(reloaded.access_token, "fresh-token");
    assert!(reloaded.expiry > OffsetDateTime::now_utc() + time::Duration::minutes(30));
}

#[tokio::test]
async fn far_future_credentials_are_returned_without_refresh() {
    let server = MockServer::start().await;
    // No token mock mounted: any refresh attempt would fail loudly.
    let temp = tempdir().expect("tempdir");
    let manager = manager(&temp, format!("{}/token", server.uri()), String::new());
    let far_future = OffsetDateTime::now_utc() + time::Duration::hours(2);
    manager
        .save_credentials("alice", &user_credential(far_future))
        .expect("save");

    let credential = manager
        .get_valid_credentials("alice")
        .await
        .expect("no refresh needed");
    assert_eq!(credential.access_token, "stale-token");
}

#[tokio::test]
async fn refresh_failure_surfaces_as_actionable_auth_expired() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Token has been revoked.",
        })))
        .mount(&server)
        .await;

    let temp = tempdir().expect("tempdir");
    let manager = manager(&temp, format!("{}/token", server.uri()), String::new());
    let expiring_soon = OffsetDateTime::now_utc() + time::Duration::minutes(2);
    manager
        .save_credentials("alice", &user_credential(expiring_soon))
        .expect("save");

    let error = manager
        .get_valid_credentials("alice")
        .await
        .expect_err("refresh fails");
    assert_eq!(error.kind(), ErrorKind::AuthExpired);
    assert!(error.message().contains("gdrv auth login --profile alice"));
}

#[tokio::test(start_paused = true)]
async fn device_flow_polls_until_the_grant_resolves() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/device"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "device_code": "dev-123",
            "user_code": "ABCD-EFGH",
            "verification_url": "https://example.com/device",
            "expires_in": 1800,
            "interval": 5,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "authorization_pending",
        })))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "device-token",
            "expires_in": 3600,
            "scope": "https://www.googleapis.com/auth/drive",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp = tempdir().expect("tempdir");
    let manager = manager(
        &temp,
        format!("{}/token", server.uri()),
        format!("{}/device", server.uri()),
    );

    let opts = AuthOptions::default();
    let (device, scopes) = manager
        .start_device_authorization(&opts)
        .await
        .expect("device code");
    assert_eq!(device.user_code, "ABCD-EFGH");
    assert!(device.poll_interval() >= std::time::Duration::from_secs(5));

    let cancel = CancellationToken::new();
    let credential = manager
        .finish_device_authorization("alice", &device, &scopes, &cancel)
        .await
        .expect("grant resolves");
    assert_eq!(credential.access_token, "device-token");
    assert!(credential
        .scopes
        .contains("https://www.googleapis.com/auth/drive"));
}

#[tokio::test(start_paused = true)]
async fn device_denial_is_a_terminal_permission_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "access_denied",
        })))
        .mount(&server)
        .await;

    let temp = tempdir().expect("tempdir");
    let manager = manager(&temp, format!("{}/token", server.uri()), String::new());
    let device = gdrv_auth::device::DeviceCodeResponse {
        device_code: String::from("dev-123"),
        user_code: String::from("ABCD-EFGH"),
        verification_url: String::from("https://example.com/device"),
        expires_in: 60,
        interval: Some(0),
    };

    let cancel = CancellationToken::new();
    let error = manager
        .finish_device_authorization("alice", &device, &[], &cancel)
        .await
        .expect_err("denied");
    assert_eq!(error.kind(), ErrorKind::PermissionDenied);
}

#[test]
fn login_record_lands_at_the_partitioned_path() {
    let temp = tempdir().expect("tempdir");
    let config_dir = ConfigDir::at(temp.path().join("gdrv"));
    let manager = AuthManager::new(
        config_dir.clone(),
        OAuthClient {
            client_id: String::from("X.apps.googleusercontent.com"),
            client_secret: Some(String::from("secret")),
        },
        StorageOverride::ForceEncrypted,
    )
    .expect("manager");

    let expiry = OffsetDateTime::now_utc() + time::Duration::hours(1);
    manager
        .save_credentials("alice", &user_credential(expiry))
        .expect("save");

    let key = storage_key("alice", "X.apps.googleusercontent.com");
    assert!(key.ends_with(&client_id_hash("X.apps.googleusercontent.com")));
    assert!(config_dir
        .credentials_dir()
        .join(format!("{key}.enc"))
        .exists());
    assert!(config_dir
        .credentials_dir()
        .join(format!("{key}.meta.json"))
        .exists());
    assert_eq!(manager.backend_name(), "encrypted-file");
}
