//! # Overview
//!
//! `gdrv-auth` implements the credential lifecycle for the gdrv workspace:
//! three storage backends behind one interface, three acquisition flows
//! (loopback OAuth with PKCE, device-code polling, service-account bearer
//! grants with optional impersonation), silent refresh inside a five-minute
//! expiry buffer, scope validation, and per-client-ID credential
//! partitioning.
//!
//! # Design
//!
//! [`manager::AuthManager`] owns storage selection and the OAuth client
//! identity; the flows in [`oauth`], [`device`], and [`service_account`]
//! stay free of storage concerns so they can be exercised against mock
//! endpoints. Metadata sidecars ([`metadata`]) make diagnostics and profile
//! enumeration possible without unsealing credentials.
//!
//! # See also
//!
//! - [`store`] for backend selection order and on-disk formats.
//! - [`credentials`] for the storage-key derivation that binds records to
//!   the OAuth client that minted them.

pub mod client;
pub mod credentials;
pub mod device;
pub mod manager;
pub mod metadata;
pub mod oauth;
pub mod service_account;
pub mod store;

pub use client::{is_headless, resolve_client, OAuthClient};
pub use credentials::{
    client_id_hash, storage_key, Credential, CredentialType, StoredCredential, EXPIRY_BUFFER,
};
pub use manager::{AuthDiagnostics, AuthManager, AuthOptions, ProfileStatus, DEFAULT_SCOPES};
pub use oauth::AuthEndpoints;
pub use store::{CredentialStore, StorageOverride};
