//! Shared primitives used across every gateway crate: identifiers, the
//! client-facing error envelope, and small hashing/time helpers.
//!
//! This crate intentionally has no dependency on tokio, axum, or any
//! concrete HTTP client — it is the leaf of the workspace dependency graph.

pub mod error;
pub mod ids;
pub mod sticky;
pub mod time_util;

pub use error::{ErrorKind, GatewayError};
pub use ids::CredentialId;
pub use sticky::sticky_key_hash;
pub use time_util::now_unix;
