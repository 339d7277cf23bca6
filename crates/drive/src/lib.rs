//! # Overview
//!
//! `gdrv-drive` holds the thin API wrappers that convert the platform's
//! JSON resources into the internal data model. Every manager routes its
//! calls through the shared [`ApiContext`]: request shaping, classified
//! retries, and cancellation come from `gdrv-transport`; nothing here
//! implements its own error handling or backoff.
//!
//! The sync engine and the path resolver see this crate only through their
//! contracts ([`gdrv_engine::RemoteTree`], [`gdrv_engine::TransferOps`],
//! [`gdrv_transport::ChildLookup`]), implemented in [`sync_ops`].

pub mod about;
pub mod activity;
pub mod admin;
pub mod changes;
pub mod docs;
pub mod drives;
pub mod files;
pub mod labels;
pub mod model;
pub mod permissions;
pub mod sheets;
pub mod slides;
pub mod sync_ops;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use gdrv_core::{AppResult, FieldsPreset, RequestContext};
use gdrv_transport::{execute_with_retry, Connection, ResourceKeys, RetryPolicy};

pub use model::RemoteFile;
pub use sync_ops::SyncOps;

/// Service endpoints; tests point these at a mock server.
#[derive(Clone, Debug)]
pub struct Endpoints {
    pub drive: String,
    pub upload: String,
    pub sheets: String,
    pub docs: String,
    pub slides: String,
    pub admin: String,
    pub labels: String,
    pub activity: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            drive: String::from("https://www.googleapis.com/drive/v3"),
            upload: String::from("https://www.googleapis.com/upload/drive/v3"),
            sheets: String::from("https://sheets.googleapis.com/v4/spreadsheets"),
            docs: String::from("https://docs.googleapis.com/v1/documents"),
            slides: String::from("https://slides.googleapis.com/v1/presentations"),
            admin: String::from("https://admin.googleapis.com/admin/directory/v1"),
            labels: String::from("https://drivelabels.googleapis.com/v2"),
            activity: String::from("https://driveactivity.googleapis.com/v2/activity:query"),
        }
    }
}

/// Shared state every API manager borrows.
pub struct ApiContext {
    pub connection: Connection,
    pub retry: RetryPolicy,
    pub resource_keys: ResourceKeys,
    pub preset: FieldsPreset,
    pub cancel: CancellationToken,
    pub endpoints: Endpoints,
}

impl ApiContext {
    /// Sends a JSON-decoded request with classified retries.
    pub(crate) async fn json_with_retry<T: DeserializeOwned>(
        &self,
        req_ctx: &RequestContext,
        idempotent_mutation: bool,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> AppResult<T> {
        execute_with_retry(&self.retry, req_ctx, idempotent_mutation, &self.cancel, || {
            self.connection.send_json::<T>(build())
        })
        .await
    }

    /// Sends a request with classified retries, returning the raw response.
    pub(crate) async fn send_with_retry(
        &self,
        req_ctx: &RequestContext,
        idempotent_mutation: bool,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> AppResult<reqwest::Response> {
        execute_with_retry(&self.retry, req_ctx, idempotent_mutation, &self.cancel, || {
            self.connection.send(build())
        })
        .await
    }

    /// Remembers a resource key observed on a listed item.
    pub(crate) fn remember_resource_key(&self, file: &model::RemoteFile) {
        if let Some(key) = &file.resource_key {
            self.resource_keys.insert(file.id.clone(), key.clone());
        }
    }
}

/// Escapes a literal for embedding in a `q` query expression.
#[must_use]
pub fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
