//! Auth metadata sidecars.
//!
//! One `credentials/<key>.meta.json` per stored credential. Sidecars let
//! diagnostics and profile enumeration work without unsealing the credential
//! itself, and let the loader detect a client-id mismatch before touching
//! the sealed record.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use gdrv_core::paths::write_file_secure;
use gdrv_core::{AppError, AppResult, ConfigDir, ErrorKind};

use crate::credentials::{client_id_hash, client_id_last_four, CredentialType, StoredCredential};

/// Per-credential metadata persisted beside the sealed record.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthMetadata {
    pub profile: String,
    pub client_id_hash: String,
    pub client_id_last_four: String,
    pub scopes: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
    pub has_refresh_token: bool,
    pub credential_type: CredentialType,
    pub storage_backend: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl AuthMetadata {
    /// Builds the sidecar for a freshly saved credential.
    #[must_use]
    pub fn for_stored(stored: &StoredCredential, backend: &str, now: OffsetDateTime) -> Self {
        Self {
            profile: stored.profile.clone(),
            client_id_hash: client_id_hash(&stored.client_id),
            client_id_last_four: client_id_last_four(&stored.client_id),
            scopes: stored.scopes.clone(),
            expiry: stored.expiry,
            has_refresh_token: stored.refresh_token.is_some(),
            credential_type: stored.credential_type,
            storage_backend: backend.to_owned(),
            updated_at: now,
        }
    }
}

/// Returns the sidecar path for a storage key.
#[must_use]
pub fn sidecar_path(config_dir: &ConfigDir, key: &str) -> PathBuf {
    config_dir.credentials_dir().join(format!("{key}.meta.json"))
}

/// Persists the sidecar for `key`.
pub fn write_sidecar(config_dir: &ConfigDir, key: &str, metadata: &AuthMetadata) -> AppResult<()> {
    config_dir.ensure()?;
    let bytes = serde_json::to_vec_pretty(metadata)?;
    write_file_secure(&sidecar_path(config_dir, key), &bytes)
}

/// Loads the sidecar for `key`, if present.
pub fn read_sidecar(config_dir: &ConfigDir, key: &str) -> AppResult<Option<AuthMetadata>> {
    let path = sidecar_path(config_dir, key);
    if !path.exists() {
        return Ok(None);
    }
    read_sidecar_file(&path).map(Some)
}

/// Removes the sidecar for `key`, if present.
pub fn remove_sidecar(config_dir: &ConfigDir, key: &str) -> AppResult<()> {
    let path = sidecar_path(config_dir, key);
    if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Scans every sidecar in the credentials directory.
///
/// Returns `(storage_key, metadata)` pairs; unreadable sidecars are skipped
/// with a log record rather than failing the scan.
pub fn scan_sidecars(config_dir: &ConfigDir) -> AppResult<Vec<(String, AuthMetadata)>> {
    let dir = config_dir.credentials_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut sidecars = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(key) = name.strip_suffix(".meta.json") else {
            continue;
        };
        match read_sidecar_file(&entry.path()) {
            Ok(metadata) => sidecars.push((key.to_owned(), metadata)),
            Err(error) => {
                tracing::warn!(sidecar = name, %error, "skipping unreadable auth sidecar");
            }
        }
    }
    Ok(sidecars)
}

/// Finds the most recently updated sidecar for `profile`.
pub fn latest_for_profile(
    config_dir: &ConfigDir,
    profile: &str,
) -> AppResult<Option<(String, AuthMetadata)>> {
    let mut best: Option<(String, AuthMetadata)> = None;
    for (key, metadata) in scan_sidecars(config_dir)? {
        if metadata.profile != profile {
            continue;
        }
        let newer = best
            .as_ref()
            .map_or(true, |(_, current)| metadata.updated_at > current.updated_at);
        if newer {
            best = Some((key, metadata));
        }
    }
    Ok(best)
}

fn read_sidecar_file(path: &Path) -> AppResult<AuthMetadata> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|error| {
        AppError::new(
            ErrorKind::Unknown,
            format!("malformed auth sidecar {}: {error}", path.display()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::storage_key;
    use tempfile::tempdir;
    use time::macros::datetime;

    fn stored(profile: &str, client_id: &str, updated: OffsetDateTime) -> (String, AuthMetadata) {
        let stored = StoredCredential {
            profile: profile.to_owned(),
            access_token: String::from("token"),
            refresh_token: Some(String::from("refresh")),
            expiry: updated + time::Duration::hours(1),
            scopes: vec![String::from("drive")],
            credential_type: CredentialType::UserOauth,
            client_id: client_id.to_owned(),
            service_account_email: None,
            impersonated_subject: None,
        };
        let key = storage_key(profile, client_id);
        (key, AuthMetadata::for_stored(&stored, "encrypted-file", updated))
    }

    #[test]
    fn sidecar_round_trips() {
        let temp = tempdir().expect("tempdir");
        let dir = ConfigDir::at(temp.path().join("gdrv"));
        let (key, metadata) = stored("alice", "clientX", datetime!(2026-02-01 09:00:00 UTC));

        write_sidecar(&dir, &key, &metadata).expect("write");
        let loaded = read_sidecar(&dir, &key).expect("read").expect("present");
        assert_eq!(loaded.profile, "alice");
        assert_eq!(loaded.client_id_hash, client_id_hash("clientX"));
        assert!(loaded.has_refresh_token);
        assert_eq!(loaded.storage_backend, "encrypted-file");
    }

    #[test]
    fn latest_for_profile_prefers_newest_update() {
        let temp = tempdir().expect("tempdir");
        let dir = ConfigDir::at(temp.path().join("gdrv"));
        let (old_key, old_meta) = stored("alice", "clientA", datetime!(2026-01-01 00:00:00 UTC));
        let (new_key, new_meta) = stored("alice", "clientB", datetime!(2026-02-01 00:00:00 UTC));
        let (_, other) = stored("bob", "clientC", datetime!(2026-03-01 00:00:00 UTC));

        write_sidecar(&dir, &old_key, &old_meta).expect("write old");
        write_sidecar(&dir, &new_key, &new_meta).expect("write new");
        write_sidecar(&dir, &storage_key("bob", "clientC"), &other).expect("write other");

        let (key, metadata) = latest_for_profile(&dir, "alice")
            .expect("scan")
            .expect("match");
        assert_eq!(key, new_key);
        assert_eq!(metadata.client_id_hash, client_id_hash("clientB"));
    }

    #[test]
    fn scan_skips_foreign_files() {
        let temp = tempdir().expect("tempdir");
        let dir = ConfigDir::at(temp.path().join("gdrv"));
        dir.ensure().expect("ensure");
        fs::write(dir.credentials_dir().join("alice--ff.enc"), b"sealed").expect("write");

        let sidecars = scan_sidecars(&dir).expect("scan");
        assert!(sidecars.is_empty());
    }
}
