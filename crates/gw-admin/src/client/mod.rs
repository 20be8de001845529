//! Shared request-dispatch helpers used by both client-facing surfaces
//! (OpenAI-compatible and Gemini-native): credential selection, the
//! upstream call itself, and outcome reporting.

pub mod pipeline;

pub use pipeline::{call_upstream, credential_auth_header, pick_credential, upstream_url};
