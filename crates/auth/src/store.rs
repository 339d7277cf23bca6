//! Credential storage backends.
//!
//! Three implementations share the [`CredentialStore`] interface:
//!
//! - [`KeyringStore`] keeps one opaque string per key in the OS secret
//!   service. The service cannot enumerate, so profile listing relies on the
//!   `profiles.json` index maintained by the manager.
//! - [`EncryptedFileStore`] seals each record with AES-256-GCM under a
//!   32-byte key held in `.keyfile` (created on first use, mode 0600). A
//!   record is `nonce ++ ciphertext` at `credentials/<key>.enc`.
//! - [`PlainFileStore`] writes `credentials/<key>.json` unencrypted; it is
//!   only selected under an explicit override and the selection carries a
//!   warning onto the output envelope.
//!
//! Selection order: forced plain, forced encrypted, a keyring probe
//! (round-tripping a throwaway record), encrypted file, plain file with a
//! warning.

use std::fs;
use std::path::PathBuf;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use zeroize::Zeroizing;

use gdrv_core::paths::{create_dir_secure, write_file_secure};
use gdrv_core::{AppError, AppResult, ConfigDir, ErrorKind, Warning};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const KEYRING_SERVICE: &str = "gdrv";

/// Storage backend contract shared by all three implementations.
pub trait CredentialStore: Send + Sync {
    /// Persists `bytes` under `key`, replacing any existing record.
    fn save(&self, key: &str, bytes: &[u8]) -> AppResult<()>;

    /// Loads the record stored under `key`.
    ///
    /// Returns [`ErrorKind::AuthRequired`] when no record exists.
    fn load(&self, key: &str) -> AppResult<Vec<u8>>;

    /// Removes the record stored under `key`, if present.
    fn delete(&self, key: &str) -> AppResult<()>;

    /// Stable backend name surfaced by `auth status` and `auth diagnose`.
    fn name(&self) -> &'static str;
}

/// Explicit backend override from flags or configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StorageOverride {
    #[default]
    Auto,
    ForceEncrypted,
    ForcePlain,
}

/// OS secret-service backend.
pub struct KeyringStore;

impl KeyringStore {
    fn entry(key: &str) -> AppResult<keyring::Entry> {
        keyring::Entry::new(KEYRING_SERVICE, key).map_err(|error| {
            AppError::new(
                ErrorKind::Unknown,
                format!("secret service unavailable: {error}"),
            )
        })
    }

    /// Round-trips a throwaway record to check that the service works.
    #[must_use]
    pub fn probe() -> bool {
        let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, "gdrv-backend-probe") else {
            return false;
        };
        if entry.set_password("probe").is_err() {
            return false;
        }
        let ok = matches!(entry.get_password().as_deref(), Ok("probe"));
        let _ = entry.delete_credential();
        ok
    }
}

impl CredentialStore for KeyringStore {
    fn save(&self, key: &str, bytes: &[u8]) -> AppResult<()> {
        let text = std::str::from_utf8(bytes).map_err(|_| {
            AppError::new(ErrorKind::Unknown, "credential record is not valid UTF-8")
        })?;
        Self::entry(key)?.set_password(text).map_err(|error| {
            AppError::new(ErrorKind::Unknown, format!("keyring save failed: {error}"))
        })
    }

    fn load(&self, key: &str) -> AppResult<Vec<u8>> {
        match Self::entry(key)?.get_password() {
            Ok(text) => Ok(text.into_bytes()),
            Err(keyring::Error::NoEntry) => Err(no_record(key)),
            Err(error) => Err(AppError::new(
                ErrorKind::Unknown,
                format!("keyring load failed: {error}"),
            )),
        }
    }

    fn delete(&self, key: &str) -> AppResult<()> {
        match Self::entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AppError::new(
                ErrorKind::Unknown,
                format!("keyring delete failed: {error}"),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "keyring"
    }
}

/// AES-256-GCM file backend.
pub struct EncryptedFileStore {
    credentials_dir: PathBuf,
    keyfile: PathBuf,
}

impl EncryptedFileStore {
    /// Opens the backend, creating the keyfile on first use.
    pub fn open(config_dir: &ConfigDir) -> AppResult<Self> {
        config_dir.ensure()?;
        let store = Self {
            credentials_dir: config_dir.credentials_dir(),
            keyfile: config_dir.keyfile(),
        };
        store.load_or_create_key()?;
        Ok(store)
    }

    fn load_or_create_key(&self) -> AppResult<Zeroizing<Vec<u8>>> {
        if self.keyfile.exists() {
            let encoded = fs::read_to_string(&self.keyfile)?;
            let key = Zeroizing::new(BASE64.decode(encoded.trim()).map_err(|_| {
                AppError::new(ErrorKind::Unknown, "keyfile is not valid base64")
            })?);
            if key.len() != KEY_LEN {
                return Err(AppError::new(
                    ErrorKind::Unknown,
                    "keyfile does not hold a 32-byte key",
                ));
            }
            return Ok(key);
        }
        let mut key = Zeroizing::new(vec![0_u8; KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut key);
        write_file_secure(&self.keyfile, BASE64.encode(key.as_slice()).as_bytes())?;
        Ok(key)
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.credentials_dir.join(format!("{key}.enc"))
    }
}

impl CredentialStore for EncryptedFileStore {
    fn save(&self, key: &str, bytes: &[u8]) -> AppResult<()> {
        let secret = self.load_or_create_key()?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&secret));
        let mut nonce_bytes = [0_u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), bytes)
            .map_err(|_| AppError::new(ErrorKind::Unknown, "credential sealing failed"))?;
        let mut record = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        record.extend_from_slice(&nonce_bytes);
        record.extend_from_slice(&ciphertext);
        create_dir_secure(&self.credentials_dir)?;
        write_file_secure(&self.record_path(key), &record)
    }

    fn load(&self, key: &str) -> AppResult<Vec<u8>> {
        let path = self.record_path(key);
        if !path.exists() {
            return Err(no_record(key));
        }
        let record = fs::read(&path)?;
        if record.len() <= NONCE_LEN {
            return Err(AppError::new(ErrorKind::Unknown, "credential record truncated"));
        }
        let secret = self.load_or_create_key()?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&secret));
        let (nonce, ciphertext) = record.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                AppError::new(
                    ErrorKind::Unknown,
                    "credential decryption failed; the keyfile may have changed",
                )
            })
    }

    fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.record_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "encrypted-file"
    }
}

/// Unencrypted file backend, selected only under explicit override.
pub struct PlainFileStore {
    credentials_dir: PathBuf,
}

impl PlainFileStore {
    pub fn open(config_dir: &ConfigDir) -> AppResult<Self> {
        config_dir.ensure()?;
        Ok(Self {
            credentials_dir: config_dir.credentials_dir(),
        })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.credentials_dir.join(format!("{key}.json"))
    }
}

impl CredentialStore for PlainFileStore {
    fn save(&self, key: &str, bytes: &[u8]) -> AppResult<()> {
        create_dir_secure(&self.credentials_dir)?;
        write_file_secure(&self.record_path(key), bytes)
    }

    fn load(&self, key: &str) -> AppResult<Vec<u8>> {
        let path = self.record_path(key);
        if !path.exists() {
            return Err(no_record(key));
        }
        Ok(fs::read(path)?)
    }

    fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.record_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "plain-file"
    }
}

/// Selects a backend per the documented order.
///
/// Returns the backend together with an optional warning for the envelope
/// when the plain-file fallback was reached without an explicit override.
pub fn select_store(
    config_dir: &ConfigDir,
    requested: StorageOverride,
) -> AppResult<(Box<dyn CredentialStore>, Option<Warning>)> {
    match requested {
        StorageOverride::ForcePlain => {
            let store = PlainFileStore::open(config_dir)?;
            let warning = Warning::new(
                "PLAIN_STORAGE",
                "credentials are stored unencrypted (--storage plain)",
            );
            Ok((Box::new(store), Some(warning)))
        }
        StorageOverride::ForceEncrypted => {
            Ok((Box::new(EncryptedFileStore::open(config_dir)?), None))
        }
        StorageOverride::Auto => {
            if KeyringStore::probe() {
                return Ok((Box::new(KeyringStore), None));
            }
            match EncryptedFileStore::open(config_dir) {
                Ok(store) => Ok((Box::new(store), None)),
                Err(error) => {
                    tracing::warn!(%error, "encrypted backend unavailable, falling back to plain files");
                    let store = PlainFileStore::open(config_dir)?;
                    let warning = Warning::new(
                        "PLAIN_STORAGE",
                        "no secure credential backend available; storing credentials unencrypted",
                    );
                    Ok((Box::new(store), Some(warning)))
                }
            }
        }
    }
}

fn no_record(key: &str) -> AppError {
    AppError::new(
        ErrorKind::AuthRequired,
        "no stored credentials; run 'gdrv auth login'",
    )
    .with_context("credentialKey", key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_dir(temp: &tempfile::TempDir) -> ConfigDir {
        ConfigDir::at(temp.path().join("gdrv"))
    }

    #[test]
    fn encrypted_store_round_trips() {
        let temp = tempdir().expect("tempdir");
        let store = EncryptedFileStore::open(&config_dir(&temp)).expect("open");
        store.save("alice--abc", b"{\"secret\":true}").expect("save");
        let loaded = store.load("alice--abc").expect("load");
        assert_eq!(loaded, b"{\"secret\":true}");
    }

    #[test]
    fn encrypted_records_are_not_plaintext_on_disk() {
        let temp = tempdir().expect("tempdir");
        let dir = config_dir(&temp);
        let store = EncryptedFileStore::open(&dir).expect("open");
        store.save("alice--abc", b"super-secret-token").expect("save");
        let raw = fs::read(dir.credentials_dir().join("alice--abc.enc")).expect("read");
        assert!(!raw.windows(b"super-secret".len()).any(|w| w == b"super-secret"));
        assert!(raw.len() > NONCE_LEN);
    }

    #[test]
    fn keyfile_is_created_once_and_reused() {
        let temp = tempdir().expect("tempdir");
        let dir = config_dir(&temp);
        let store = EncryptedFileStore::open(&dir).expect("open");
        store.save("k", b"payload").expect("save");
        let key_before = fs::read(dir.keyfile()).expect("keyfile");

        // A second instance must reuse the same key and decrypt old records.
        let store = EncryptedFileStore::open(&dir).expect("reopen");
        assert_eq!(store.load("k").expect("load"), b"payload");
        assert_eq!(fs::read(dir.keyfile()).expect("keyfile"), key_before);
    }

    #[test]
    fn missing_record_is_auth_required() {
        let temp = tempdir().expect("tempdir");
        let store = EncryptedFileStore::open(&config_dir(&temp)).expect("open");
        let error = store.load("ghost").expect_err("missing record");
        assert_eq!(error.kind(), ErrorKind::AuthRequired);
    }

    #[test]
    fn delete_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let store = PlainFileStore::open(&config_dir(&temp)).expect("open");
        store.save("bob--ff", b"x").expect("save");
        store.delete("bob--ff").expect("first delete");
        store.delete("bob--ff").expect("second delete");
        assert!(store.load("bob--ff").is_err());
    }

    #[test]
    fn plain_store_round_trips() {
        let temp = tempdir().expect("tempdir");
        let store = PlainFileStore::open(&config_dir(&temp)).expect("open");
        store.save("carol--11", b"{\"token\":\"t\"}").expect("save");
        assert_eq!(store.load("carol--11").expect("load"), b"{\"token\":\"t\"}");
        assert_eq!(store.name(), "plain-file");
    }

    #[test]
    fn forced_plain_selection_warns() {
        let temp = tempdir().expect("tempdir");
        let (store, warning) =
            select_store(&config_dir(&temp), StorageOverride::ForcePlain).expect("select");
        assert_eq!(store.name(), "plain-file");
        assert!(warning.is_some());
    }

    #[test]
    fn forced_encrypted_selection_does_not_warn() {
        let temp = tempdir().expect("tempdir");
        let (store, warning) =
            select_store(&config_dir(&temp), StorageOverride::ForceEncrypted).expect("select");
        assert_eq!(store.name(), "encrypted-file");
        assert!(warning.is_none());
    }
}
