//! # Overview
//!
//! `gdrv-transport` is the unified remote-call path every API wrapper in the
//! workspace shares: failure classification into the closed error taxonomy,
//! retry with decorrelated jitter for the kinds and request types that allow
//! it, request shaping (resource keys, shared-drive flags, field masks),
//! path-to-id resolution with a TTL-bounded cache, and polling for
//! long-running operations.
//!
//! # Design
//!
//! The pieces compose rather than stack: an API wrapper builds a request
//! with [`http::Connection`] and [`shaper::shape_request`], then hands the
//! send closure to [`retry::execute_with_retry`], which consults
//! [`classify`] on every failure. Nothing here knows about specific API
//! endpoints; resolution reaches the remote tree through the
//! [`resolver::ChildLookup`] contract implemented by the files wrapper.

pub mod classify;
pub mod http;
pub mod poller;
pub mod resolver;
pub mod retry;
pub mod shaper;

pub use classify::{classify, ApiFailure, ConnectionFailure};
pub use http::Connection;
pub use poller::{operation_url, poll_until_ready, PollConfig, PollStatus};
pub use resolver::{
    looks_like_path, normalize_path, resolve, ChildCandidate, ChildLookup, PathCache, Resolved,
    ResolveRequest,
};
pub use retry::{backoff_delay, execute_with_retry, may_retry, RetryPolicy};
pub use shaper::{shape_request, RequestShape, ResourceKeys};
