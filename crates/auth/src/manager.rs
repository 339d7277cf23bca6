//! # Overview
//!
//! [`AuthManager`] owns backend selection and the OAuth client identity, and
//! implements the acquisition flows on top of them: loopback OAuth with a
//! manual fallback, the device-authorization flow, and service-account
//! bearer grants. It also performs silent refresh, scope validation, logout,
//! profile enumeration, and diagnostics.
//!
//! # Design
//!
//! Credentials persist under `profile--<hex(sha256(client_id))>` so a record
//! minted for one OAuth client is never silently reused by another. Loading
//! first tries the current-client key, then the legacy bare-profile key, and
//! finally consults metadata sidecars: a sidecar recording a different
//! client-id hash fails the load with an explicit mismatch message instead
//! of unsealing the foreign record.
//!
//! # Invariants
//!
//! - Credential saves serialize through a coarse mutex; the store is
//!   single-writer.
//! - Every save also writes the metadata sidecar and updates the profile
//!   index used by backends that cannot enumerate.
//! - A credential within five minutes of expiry is refreshed before use.

use std::io::{BufRead, Write as IoWrite};
use std::path::Path;
use std::sync::Mutex;

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use gdrv_core::paths::write_file_secure;
use gdrv_core::{AppError, AppResult, ConfigDir, ErrorKind, Warning};

use crate::client::{is_headless, OAuthClient};
use crate::credentials::{
    client_id_hash, storage_key, Credential, CredentialType, StoredCredential,
};
use crate::device::{poll_for_token, request_device_code, DeviceCodeResponse};
use crate::metadata::{
    latest_for_profile, remove_sidecar, scan_sidecars, write_sidecar, AuthMetadata,
};
use crate::oauth::{
    bind_loopback, build_consent_url, exchange_code, generate_state, refresh_access_token,
    wait_for_code, AuthEndpoints, Pkce,
};
use crate::service_account::{mint_token, ServiceAccountKey};
use crate::store::{select_store, CredentialStore, StorageOverride};

/// Redirect target for the manual fallback flow.
const MANUAL_REDIRECT_URI: &str = "http://127.0.0.1:49152/callback";

/// Scopes requested when the caller supplies none.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/documents",
    "https://www.googleapis.com/auth/presentations",
];

/// Options for the interactive login flows.
#[derive(Debug, Default)]
pub struct AuthOptions {
    /// Scopes to request; defaults to [`DEFAULT_SCOPES`].
    pub scopes: Vec<String>,
    /// Forces the manual (copy/paste) fallback.
    pub no_browser: bool,
}

impl AuthOptions {
    fn scopes_or_default(&self) -> Vec<String> {
        if self.scopes.is_empty() {
            DEFAULT_SCOPES.iter().map(|s| (*s).to_owned()).collect()
        } else {
            self.scopes.clone()
        }
    }
}

/// Summary of one stored profile, assembled from sidecars.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStatus {
    pub profile: String,
    pub storage_backend: String,
    pub credential_type: CredentialType,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
    pub has_refresh_token: bool,
    pub client_id_last_four: String,
    pub matches_current_client: bool,
}

/// Diagnostic report for `auth diagnose`.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthDiagnostics {
    pub storage_backend: String,
    pub keyring_available: bool,
    pub client_id_hash: String,
    pub profiles: Vec<ProfileStatus>,
}

/// Owns credential storage and the acquisition flows.
pub struct AuthManager {
    config_dir: ConfigDir,
    store: Box<dyn CredentialStore>,
    selection_warning: Option<Warning>,
    http: reqwest::Client,
    client: OAuthClient,
    endpoints: AuthEndpoints,
    save_lock: Mutex<()>,
}

impl AuthManager {
    /// Builds a manager, selecting a storage backend per the documented
    /// order.
    pub fn new(
        config_dir: ConfigDir,
        client: OAuthClient,
        storage: StorageOverride,
    ) -> AppResult<Self> {
        let (store, selection_warning) = select_store(&config_dir, storage)?;
        Ok(Self {
            config_dir,
            store,
            selection_warning,
            http: reqwest::Client::new(),
            client,
            endpoints: AuthEndpoints::default(),
            save_lock: Mutex::new(()),
        })
    }

    /// Overrides the OAuth endpoints; used by tests against a mock server.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: AuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Warning recorded during backend selection, if any.
    #[must_use]
    pub fn selection_warning(&self) -> Option<&Warning> {
        self.selection_warning.as_ref()
    }

    /// Name of the selected storage backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    /// The OAuth client this manager operates for.
    #[must_use]
    pub const fn client(&self) -> &OAuthClient {
        &self.client
    }

    /// Runs the loopback OAuth flow, falling back to the manual flow when
    /// the environment is headless, `no_browser` is set, or binding the
    /// loopback listener fails.
    pub async fn authenticate(
        &self,
        profile: &str,
        open_browser: bool,
        opts: &AuthOptions,
        cancel: &CancellationToken,
    ) -> AppResult<Credential> {
        let scopes = opts.scopes_or_default();
        if opts.no_browser || is_headless() {
            return self.authenticate_manual(profile, &scopes, cancel).await;
        }
        let (listener, addr) = match bind_loopback().await {
            Ok(bound) => bound,
            Err(error) => {
                tracing::warn!(%error, "loopback bind failed, using manual flow");
                return self.authenticate_manual(profile, &scopes, cancel).await;
            }
        };

        let redirect_uri = format!("http://127.0.0.1:{}/callback", addr.port());
        let state = generate_state();
        let pkce = Pkce::generate();
        let consent = build_consent_url(
            &self.endpoints.auth_url,
            &self.client,
            &redirect_uri,
            &scopes,
            &state,
            &pkce,
        )?;

        if open_browser && webbrowser::open(consent.as_str()).is_err() {
            tracing::warn!("could not launch a browser; open the URL manually");
        }
        eprintln!("Waiting for authorization; if no browser opened, visit:\n  {consent}");

        let callback = wait_for_code(listener, &state, cancel).await?;
        let token = exchange_code(
            &self.http,
            &self.endpoints.token_url,
            &self.client,
            &callback.code,
            &pkce.verifier,
            &redirect_uri,
        )
        .await?;

        let credential = self.credential_from_token(token, &scopes);
        credential.validate()?;
        self.save_credentials(profile, &credential)?;
        Ok(credential)
    }

    /// Manual fallback: print the consent URL and read the pasted code.
    async fn authenticate_manual(
        &self,
        profile: &str,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> AppResult<Credential> {
        let state = generate_state();
        let pkce = Pkce::generate();
        let consent = build_consent_url(
            &self.endpoints.auth_url,
            &self.client,
            MANUAL_REDIRECT_URI,
            scopes,
            &state,
            &pkce,
        )?;
        eprintln!("Open this URL in a browser, authorize access, then paste the 'code' parameter:");
        eprintln!("  {consent}");
        eprint!("code: ");
        std::io::stderr().flush().ok();

        let code = tokio::select! {
            () = cancel.cancelled() => return Err(AppError::cancelled()),
            code = tokio::task::spawn_blocking(read_code_line) => code
                .map_err(|_| AppError::new(ErrorKind::Unknown, "stdin reader panicked"))??,
        };

        let token = exchange_code(
            &self.http,
            &self.endpoints.token_url,
            &self.client,
            &code,
            &pkce.verifier,
            MANUAL_REDIRECT_URI,
        )
        .await?;
        let credential = self.credential_from_token(token, scopes);
        credential.validate()?;
        self.save_credentials(profile, &credential)?;
        Ok(credential)
    }

    /// Starts the device-authorization flow; the caller displays the user
    /// code and verification URL before finishing.
    pub async fn start_device_authorization(
        &self,
        opts: &AuthOptions,
    ) -> AppResult<(DeviceCodeResponse, Vec<String>)> {
        let scopes = opts.scopes_or_default();
        let device = request_device_code(
            &self.http,
            &self.endpoints.device_url,
            &self.client,
            &scopes,
        )
        .await?;
        Ok((device, scopes))
    }

    /// Polls the token endpoint until the device grant resolves, then saves
    /// the credential.
    pub async fn finish_device_authorization(
        &self,
        profile: &str,
        device: &DeviceCodeResponse,
        scopes: &[String],
        cancel: &CancellationToken,
    ) -> AppResult<Credential> {
        let token = poll_for_token(
            &self.http,
            &self.endpoints.token_url,
            &self.client,
            device,
            cancel,
        )
        .await?;
        let credential = self.credential_from_token(token, scopes);
        credential.validate()?;
        self.save_credentials(profile, &credential)?;
        Ok(credential)
    }

    /// Authenticates from a service-account key file.
    pub async fn login_service_account(
        &self,
        profile: &str,
        key_path: &Path,
        opts: &AuthOptions,
        subject: Option<&str>,
    ) -> AppResult<Credential> {
        let key = ServiceAccountKey::from_file(key_path)?;
        let scopes = opts.scopes_or_default();
        let credential = mint_token(&self.http, &key, &scopes, subject).await?;
        self.save_credentials(profile, &credential)?;
        Ok(credential)
    }

    /// Loads credentials for `profile`, refreshing them when they expire
    /// within the five-minute buffer.
    pub async fn get_valid_credentials(&self, profile: &str) -> AppResult<Credential> {
        let mut credential = self.load_credentials(profile)?;
        let now = OffsetDateTime::now_utc();

        if credential.credential_type != CredentialType::UserOauth {
            if credential.is_expired(now) {
                return Err(AppError::new(
                    ErrorKind::AuthExpired,
                    format!(
                        "service account token for profile '{profile}' expired; re-run 'gdrv auth service-account'"
                    ),
                ));
            }
            return Ok(credential);
        }

        if !credential.needs_refresh(now) {
            return Ok(credential);
        }

        let Some(refresh_token) = credential.refresh_token.clone() else {
            if credential.is_expired(now) {
                return Err(AppError::new(
                    ErrorKind::AuthExpired,
                    format!(
                        "credentials for profile '{profile}' expired without a refresh token; re-run 'gdrv auth login --profile {profile}'"
                    ),
                ));
            }
            return Ok(credential);
        };

        tracing::debug!(profile, "refreshing access token inside expiry buffer");
        match refresh_access_token(
            &self.http,
            &self.endpoints.token_url,
            &self.client,
            &refresh_token,
        )
        .await
        {
            Ok(token) => {
                credential.access_token = token.access_token;
                credential.expiry = OffsetDateTime::now_utc()
                    + time::Duration::seconds(token.expires_in);
                if let Some(new_refresh) = token.refresh_token {
                    credential.refresh_token = Some(new_refresh);
                }
                self.save_credentials(profile, &credential)?;
                Ok(credential)
            }
            Err(error) => Err(AppError::new(
                ErrorKind::AuthExpired,
                format!(
                    "token refresh for profile '{profile}' failed; re-run 'gdrv auth login --profile {profile}'"
                ),
            )
            .with_context("refreshError", error.message())),
        }
    }

    /// Fails with [`ErrorKind::ScopeInsufficient`] when `required` names a
    /// scope the credential lacks.
    pub fn validate_scopes(credential: &Credential, required: &[String]) -> AppResult<()> {
        let missing = credential.missing_scopes(required);
        if let Some(first) = missing.first() {
            return Err(AppError::new(
                ErrorKind::ScopeInsufficient,
                format!("credential lacks required scope {first}"),
            )
            .with_context("missingScopes", serde_json::json!(missing)));
        }
        Ok(())
    }

    /// Loads the stored credential for `profile` without refreshing.
    pub fn load_credentials(&self, profile: &str) -> AppResult<Credential> {
        let current_key = storage_key(profile, &self.client.client_id);
        match self.store.load(&current_key) {
            Ok(bytes) => return StoredCredential::from_bytes(&bytes).map(StoredCredential::into_credential),
            Err(error) if error.kind() != ErrorKind::AuthRequired => return Err(error),
            Err(_) => {}
        }

        // Migrations: records written before per-client partitioning live
        // under the bare profile name.
        if let Ok(bytes) = self.store.load(profile) {
            tracing::debug!(profile, "loaded credential from legacy storage key");
            return StoredCredential::from_bytes(&bytes).map(StoredCredential::into_credential);
        }

        let current_hash = client_id_hash(&self.client.client_id);
        if let Some((_, sidecar)) = latest_for_profile(&self.config_dir, profile)? {
            if sidecar.client_id_hash != current_hash {
                return Err(AppError::new(
                    ErrorKind::AuthRequired,
                    format!(
                        "stored credentials for profile '{profile}' belong to a different OAuth client (…{}); re-run 'gdrv auth login --profile {profile}'",
                        sidecar.client_id_last_four
                    ),
                )
                .with_context("storedClientIdHash", sidecar.client_id_hash.clone())
                .with_context("currentClientIdHash", current_hash));
            }
        }

        Err(AppError::new(
            ErrorKind::AuthRequired,
            format!("no stored credentials for profile '{profile}'; run 'gdrv auth login --profile {profile}'"),
        ))
    }

    /// Persists a credential under its client's partitioned key.
    pub fn save_credentials(&self, profile: &str, credential: &Credential) -> AppResult<()> {
        let _guard = self.save_lock.lock().expect("credential save lock poisoned");
        let key = storage_key(profile, &credential.client_id);
        let stored = StoredCredential::from_credential(profile, credential);
        self.store.save(&key, &stored.to_bytes()?)?;

        let metadata = AuthMetadata::for_stored(&stored, self.store.name(), OffsetDateTime::now_utc());
        write_sidecar(&self.config_dir, &key, &metadata)?;
        self.index_profile(profile, &key)?;
        tracing::info!(profile, backend = self.store.name(), "credentials saved");
        Ok(())
    }

    /// Deletes every record and sidecar belonging to `profile`.
    pub fn logout(&self, profile: &str) -> AppResult<bool> {
        let _guard = self.save_lock.lock().expect("credential save lock poisoned");
        let mut removed = false;
        for (key, metadata) in scan_sidecars(&self.config_dir)? {
            if metadata.profile == profile {
                self.store.delete(&key)?;
                remove_sidecar(&self.config_dir, &key)?;
                removed = true;
            }
        }
        // The legacy bare-profile record has no sidecar.
        if self.store.load(profile).is_ok() {
            self.store.delete(profile)?;
            removed = true;
        }
        self.unindex_profile(profile)?;
        Ok(removed)
    }

    /// Enumerates stored profiles from metadata sidecars.
    pub fn profiles(&self) -> AppResult<Vec<ProfileStatus>> {
        let current_hash = client_id_hash(&self.client.client_id);
        let mut statuses = Vec::new();
        for (_, metadata) in scan_sidecars(&self.config_dir)? {
            statuses.push(ProfileStatus {
                profile: metadata.profile.clone(),
                storage_backend: metadata.storage_backend.clone(),
                credential_type: metadata.credential_type,
                expiry: metadata.expiry,
                has_refresh_token: metadata.has_refresh_token,
                client_id_last_four: metadata.client_id_last_four.clone(),
                matches_current_client: metadata.client_id_hash == current_hash,
            });
        }
        statuses.sort_by(|a, b| a.profile.cmp(&b.profile));
        Ok(statuses)
    }

    /// Builds the diagnostics report for `auth diagnose`.
    pub fn diagnose(&self) -> AppResult<AuthDiagnostics> {
        Ok(AuthDiagnostics {
            storage_backend: self.store.name().to_owned(),
            keyring_available: crate::store::KeyringStore::probe(),
            client_id_hash: client_id_hash(&self.client.client_id),
            profiles: self.profiles()?,
        })
    }

    fn credential_from_token(
        &self,
        token: crate::oauth::TokenResponse,
        requested_scopes: &[String],
    ) -> Credential {
        let scopes = token.granted_scopes(requested_scopes);
        Credential {
            expiry: OffsetDateTime::now_utc() + time::Duration::seconds(token.expires_in),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            scopes: scopes.into_iter().collect(),
            credential_type: CredentialType::UserOauth,
            client_id: self.client.client_id.clone(),
            service_account_email: None,
            impersonated_subject: None,
        }
    }

    fn index_profile(&self, profile: &str, key: &str) -> AppResult<()> {
        let mut index = self.read_index()?;
        index.insert(profile.to_owned(), key.to_owned());
        self.write_index(&index)
    }

    fn unindex_profile(&self, profile: &str) -> AppResult<()> {
        let mut index = self.read_index()?;
        if index.remove(profile).is_some() {
            self.write_index(&index)?;
        }
        Ok(())
    }

    fn read_index(&self) -> AppResult<std::collections::BTreeMap<String, String>> {
        let path = self.config_dir.profiles_index();
        if !path.exists() {
            return Ok(std::collections::BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(|error| {
            AppError::new(
                ErrorKind::Unknown,
                format!("malformed profile index {}: {error}", path.display()),
            )
        })
    }

    fn write_index(&self, index: &std::collections::BTreeMap<String, String>) -> AppResult<()> {
        self.config_dir.ensure()?;
        let bytes = serde_json::to_vec_pretty(index)?;
        write_file_secure(&self.config_dir.profiles_index(), &bytes)
    }
}

fn read_code_line() -> AppResult<String> {
    let stdin = std::io::stdin();
    let mut line = String::new();
    stdin
        .lock()
        .read_line(&mut line)
        .map_err(|error| AppError::new(ErrorKind::Unknown, format!("failed to read code: {error}")))?;
    let code = line.trim();
    if code.is_empty() {
        return Err(AppError::new(
            ErrorKind::InvalidArgument,
            "no authorization code entered",
        ));
    }
    Ok(code.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn manager_for(temp: &tempfile::TempDir, client_id: &str) -> AuthManager {
        AuthManager::new(
            ConfigDir::at(temp.path().join("gdrv")),
            OAuthClient {
                client_id: client_id.to_owned(),
                client_secret: Some(String::from("secret")),
            },
            StorageOverride::ForceEncrypted,
        )
        .expect("manager")
    }

    fn credential(client_id: &str, expiry: OffsetDateTime) -> Credential {
        Credential {
            access_token: String::from("token"),
            refresh_token: Some(String::from("refresh")),
            expiry,
            scopes: BTreeSet::from([String::from("https://www.googleapis.com/auth/drive")]),
            credential_type: CredentialType::UserOauth,
            client_id: client_id.to_owned(),
            service_account_email: None,
            impersonated_subject: None,
        }
    }

    #[test]
    fn save_and_load_round_trips_under_partitioned_key() {
        let temp = tempdir().expect("tempdir");
        let manager = manager_for(&temp, "clientX");
        let expiry = OffsetDateTime::now_utc() + time::Duration::hours(1);
        manager
            .save_credentials("alice", &credential("clientX", expiry))
            .expect("save");

        let loaded = manager.load_credentials("alice").expect("load");
        assert_eq!(loaded.access_token, "token");
        assert_eq!(loaded.client_id, "clientX");
    }

    #[test]
    fn changing_the_client_id_fails_with_mismatch_context() {
        let temp = tempdir().expect("tempdir");
        let expiry = OffsetDateTime::now_utc() + time::Duration::hours(1);
        manager_for(&temp, "clientA")
            .save_credentials("alice", &credential("clientA", expiry))
            .expect("save");

        let error = manager_for(&temp, "clientB")
            .load_credentials("alice")
            .expect_err("mismatch");
        assert_eq!(error.kind(), ErrorKind::AuthRequired);
        assert_eq!(
            error.context().get("storedClientIdHash"),
            Some(&serde_json::json!(client_id_hash("clientA")))
        );
        assert!(error.message().contains("different OAuth client"));
    }

    #[test]
    fn legacy_bare_profile_keys_still_load() {
        let temp = tempdir().expect("tempdir");
        let manager = manager_for(&temp, "clientX");
        let expiry = OffsetDateTime::now_utc() + time::Duration::hours(1);
        let stored = StoredCredential::from_credential("alice", &credential("clientX", expiry));
        // Simulate a pre-partitioning record written under the profile name.
        manager
            .store
            .save("alice", &stored.to_bytes().expect("bytes"))
            .expect("legacy save");

        let loaded = manager.load_credentials("alice").expect("legacy load");
        assert_eq!(loaded.access_token, "token");
    }

    #[test]
    fn logout_removes_records_sidecars_and_index() {
        let temp = tempdir().expect("tempdir");
        let manager = manager_for(&temp, "clientX");
        let expiry = OffsetDateTime::now_utc() + time::Duration::hours(1);
        manager
            .save_credentials("alice", &credential("clientX", expiry))
            .expect("save");
        assert_eq!(manager.profiles().expect("profiles").len(), 1);

        assert!(manager.logout("alice").expect("logout"));
        assert!(manager.load_credentials("alice").is_err());
        assert!(manager.profiles().expect("profiles").is_empty());
        assert!(!manager.logout("alice").expect("second logout"));
    }

    #[test]
    fn profiles_reports_client_match() {
        let temp = tempdir().expect("tempdir");
        let expiry = OffsetDateTime::now_utc() + time::Duration::hours(1);
        manager_for(&temp, "clientA")
            .save_credentials("alice", &credential("clientA", expiry))
            .expect("save");

        let statuses = manager_for(&temp, "clientB").profiles().expect("profiles");
        assert_eq!(statuses.len(), 1);
        assert!(!statuses[0].matches_current_client);
        assert!(statuses[0].has_refresh_token);
    }

    #[test]
    fn scope_validation_names_the_missing_scope() {
        let expiry = OffsetDateTime::now_utc() + time::Duration::hours(1);
        let credential = credential("clientX", expiry);
        let error = AuthManager::validate_scopes(
            &credential,
            &[String::from("https://www.googleapis.com/auth/admin.directory.user")],
        )
        .expect_err("missing scope");
        assert_eq!(error.kind(), ErrorKind::ScopeInsufficient);
        assert!(error.message().contains("admin.directory.user"));
    }

    #[tokio::test]
    async fn expired_service_account_requires_reauthentication() {
        let temp = tempdir().expect("tempdir");
        let manager = manager_for(&temp, "robot@sa.example");
        let expired = OffsetDateTime::now_utc() - time::Duration::hours(1);
        let credential = Credential {
            access_token: String::from("token"),
            refresh_token: None,
            expiry: expired,
            scopes: BTreeSet::new(),
            credential_type: CredentialType::ServiceAccount,
            client_id: String::from("robot@sa.example"),
            service_account_email: Some(String::from("robot@sa.example")),
            impersonated_subject: None,
        };
        manager.save_credentials("robot", &credential).expect("save");

        let error = manager
            .get_valid_credentials("robot")
            .await
            .expect_err("expired");
        assert_eq!(error.kind(), ErrorKind::AuthExpired);
        assert!(error.message().contains("service-account"));
    }
}
