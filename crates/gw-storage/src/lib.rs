//! Storage abstraction (spec §4.4): a namespaced key/value trait plus a
//! file-backed reference implementation. Runtime request handling never
//! depends on this crate directly — it backs bootstrap load, admin
//! mutation, and periodic persistence for `gw-credential`, `gw-assembly`,
//! and `gw-admin`.

mod error;
mod file_backend;
mod traits;

pub use error::{StorageError, StorageResult};
pub use file_backend::FileStorage;
pub use traits::{
    ConfigBatchApplier, ConfigTransaction, ExportedData, Storage, StorageStats, UsageRecord,
};
