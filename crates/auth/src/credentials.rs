//! Credential model and storage-key derivation.
//!
//! A [`Credential`] is created by one of the acquisition flows, mutated only
//! by silent refresh, and destroyed by explicit logout. On disk it becomes a
//! [`StoredCredential`], persisted under a key that binds the record to the
//! OAuth client that minted it:
//!
//! ```text
//! key = profile ++ "--" ++ hex(SHA-256(client_id))
//! ```
//!
//! Legacy records stored under the bare profile name are still readable.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use gdrv_core::{AppError, AppResult, ErrorKind};

/// Refresh is triggered when a credential expires within this window.
pub const EXPIRY_BUFFER: time::Duration = time::Duration::minutes(5);

/// How a credential was acquired.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialType {
    UserOauth,
    ServiceAccount,
    ImpersonatedServiceAccount,
}

impl CredentialType {
    /// Stable label used in sidecars and diagnostics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::UserOauth => "user-oauth",
            Self::ServiceAccount => "service-account",
            Self::ImpersonatedServiceAccount => "impersonated-service-account",
        }
    }
}

/// An in-memory credential for one profile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry: OffsetDateTime,
    pub scopes: BTreeSet<String>,
    pub credential_type: CredentialType,
    pub client_id: String,
    pub service_account_email: Option<String>,
    pub impersonated_subject: Option<String>,
}

impl Credential {
    /// Checks the structural invariant: a refresh token exists iff the
    /// credential is user OAuth with offline access granted.
    pub fn validate(&self) -> AppResult<()> {
        if self.refresh_token.is_some() && self.credential_type != CredentialType::UserOauth {
            return Err(AppError::new(
                ErrorKind::Unknown,
                "refresh tokens are only valid for user-oauth credentials",
            ));
        }
        Ok(())
    }

    /// Returns `true` when the credential is past its expiry instant.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expiry
    }

    /// Returns `true` when the credential expires within the refresh buffer.
    ///
    /// A credential expiring in 4 m 59 s triggers a refresh; one expiring in
    /// 5 m 1 s does not.
    #[must_use]
    pub fn needs_refresh(&self, now: OffsetDateTime) -> bool {
        self.expiry - now <= EXPIRY_BUFFER
    }

    /// Returns the scopes in `required` that this credential lacks.
    #[must_use]
    pub fn missing_scopes(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|scope| !self.scopes.contains(*scope))
            .cloned()
            .collect()
    }
}

/// On-disk form of a [`Credential`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredential {
    pub profile: String,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// RFC 3339 expiry instant.
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
    pub scopes: Vec<String>,
    pub credential_type: CredentialType,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonated_subject: Option<String>,
}

impl StoredCredential {
    /// Wraps a credential for persistence under `profile`.
    #[must_use]
    pub fn from_credential(profile: impl Into<String>, credential: &Credential) -> Self {
        Self {
            profile: profile.into(),
            access_token: credential.access_token.clone(),
            refresh_token: credential.refresh_token.clone(),
            expiry: credential.expiry,
            scopes: credential.scopes.iter().cloned().collect(),
            credential_type: credential.credential_type,
            client_id: credential.client_id.clone(),
            service_account_email: credential.service_account_email.clone(),
            impersonated_subject: credential.impersonated_subject.clone(),
        }
    }

    /// Recovers the in-memory credential.
    #[must_use]
    pub fn into_credential(self) -> Credential {
        Credential {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expiry: self.expiry,
            scopes: self.scopes.into_iter().collect(),
            credential_type: self.credential_type,
            client_id: self.client_id,
            service_account_email: self.service_account_email,
            impersonated_subject: self.impersonated_subject,
        }
    }

    /// Serializes to the bytes handed to a credential store.
    pub fn to_bytes(&self) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parses the bytes returned by a credential store.
    pub fn from_bytes(bytes: &[u8]) -> AppResult<Self> {
        serde_json::from_slice(bytes).map_err(|error| {
            AppError::new(
                ErrorKind::Unknown,
                format!("stored credential is corrupt: {error}"),
            )
        })
    }
}

/// Returns `hex(SHA-256(client_id))`.
#[must_use]
pub fn client_id_hash(client_id: &str) -> String {
    let digest = Sha256::digest(client_id.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Derives the storage key binding `profile` to `client_id`.
#[must_use]
pub fn storage_key(profile: &str, client_id: &str) -> String {
    format!("{profile}--{}", client_id_hash(client_id))
}

/// Returns the last four characters of a client id for diagnostics.
#[must_use]
pub fn client_id_last_four(client_id: &str) -> String {
    let chars: Vec<char> = client_id.chars().collect();
    let start = chars.len().saturating_sub(4);
    chars[start..].iter().collect()
}
