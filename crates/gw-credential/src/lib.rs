//! Credential store, health scoring, and OAuth refresh (spec §4.6).
//!
//! `gw-router` depends on this crate for the candidate pool and for
//! `PrepareCredential`/`Compensate401`'s refresh calls; it does not
//! implement routing/cooldown logic itself.

mod error;
mod health;
mod model;
mod refresh;
mod store;

pub use error::{CredentialError, CredentialResult};
pub use health::{is_retryable_failure_status, record_outcome};
pub use model::{Credential, CredentialHealth, CredentialType};
pub use refresh::{OAuthRefresher, ReqwestOAuthRefresher, RefreshOutcome};
pub use store::{CredentialStore, DEFAULT_REFRESH_SINGLEFLIGHT_TIMEOUT};
