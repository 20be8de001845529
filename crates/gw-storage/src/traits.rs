use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::StorageResult;

/// Per-key counters backing the `usage` namespace (spec §4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRecord {
    pub counters: HashMap<String, i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportedData {
    pub credentials: HashMap<String, JsonValue>,
    pub configs: HashMap<String, JsonValue>,
    pub usage: HashMap<String, UsageRecord>,
}

#[derive(Debug, Clone)]
pub struct StorageStats {
    pub backend: &'static str,
    pub credential_count: usize,
    pub config_count: usize,
    pub usage_count: usize,
    pub cache_count: usize,
}

/// The storage abstraction (spec §4.4): four namespaces (credentials,
/// configs, usage, cache) plus transactional config batch apply.
///
/// Runtime reads that back request handling must not hit this trait
/// directly — callers read from in-memory snapshots populated at
/// bootstrap and refreshed by watchers; `Storage` exists for bootstrap
/// load, admin mutation, and periodic persistence.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_credential(&self, id: &str) -> StorageResult<Option<JsonValue>>;
    async fn set_credential(&self, id: &str, value: JsonValue) -> StorageResult<()>;
    async fn delete_credential(&self, id: &str) -> StorageResult<()>;
    async fn list_credentials(&self) -> StorageResult<Vec<String>>;

    async fn get_credentials_batch(
        &self,
        ids: &[String],
    ) -> StorageResult<HashMap<String, JsonValue>>;
    async fn set_credentials_batch(&self, items: HashMap<String, JsonValue>) -> StorageResult<()>;
    async fn delete_credentials_batch(&self, ids: &[String]) -> StorageResult<()>;

    async fn get_config(&self, key: &str) -> StorageResult<Option<JsonValue>>;
    async fn set_config(&self, key: &str, value: JsonValue) -> StorageResult<()>;
    async fn delete_config(&self, key: &str) -> StorageResult<()>;
    async fn list_configs(&self) -> StorageResult<Vec<String>>;

    async fn get_usage(&self, key: &str) -> StorageResult<Option<UsageRecord>>;
    async fn increment_usage(&self, key: &str, field: &str, delta: i64) -> StorageResult<()>;
    async fn list_usage(&self) -> StorageResult<Vec<String>>;

    async fn get_cache(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;
    async fn set_cache(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StorageResult<()>;
    async fn delete_cache(&self, key: &str) -> StorageResult<()>;

    async fn begin_transaction(&self) -> StorageResult<Box<dyn ConfigTransaction>>;

    async fn export_data(&self) -> StorageResult<ExportedData>;
    async fn import_data(&self, data: ExportedData) -> StorageResult<()>;

    async fn storage_stats(&self) -> StorageResult<StorageStats>;
    async fn health(&self) -> StorageResult<()>;

    /// Capability extension (spec §4.4 "Optional extensions"): idempotent
    /// batch config apply, used by `gw-assembly`'s plan apply. Backends
    /// without transaction support return `None`; callers fall back to a
    /// one-at-a-time apply.
    fn config_batch_applier(&self) -> Option<&dyn ConfigBatchApplier> {
        None
    }
}

/// The config-scope subset of `Storage` exposed inside a transaction,
/// plus `commit`/`rollback` (spec §4.4 `BeginTransaction`).
#[async_trait]
pub trait ConfigTransaction: Send + Sync {
    async fn get_config(&self, key: &str) -> StorageResult<Option<JsonValue>>;
    async fn set_config(&self, key: &str, value: JsonValue) -> StorageResult<()>;
    async fn delete_config(&self, key: &str) -> StorageResult<()>;
    async fn commit(self: Box<Self>) -> StorageResult<()>;
    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

/// Idempotent multi-key batch apply used by plan application (spec §4.3,
/// §4.4 "Optional extensions").
#[async_trait]
pub trait ConfigBatchApplier: Send + Sync {
    async fn apply_batch(&self, entries: HashMap<String, JsonValue>) -> StorageResult<()>;
}
