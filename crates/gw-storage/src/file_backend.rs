use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use crate::error::{StorageError, StorageResult};
use crate::traits::{ConfigTransaction, ExportedData, Storage, StorageStats, UsageRecord};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

type WatcherFn = Box<dyn Fn() + Send + Sync>;

/// Reference storage backend (spec §4.4 "Reference file backend"): one
/// JSON file per credential under `<root>/credentials`, configs under
/// `<root>/configs`, usage counters under `<root>/usage`, cache entries
/// under `<root>/cache`. Each namespace is guarded by its own mutex so a
/// slow write in one namespace never blocks reads in another.
///
/// Everything is also kept in an in-memory map, populated at `open()` and
/// refreshed by the polling watcher, so lookups never touch disk on the
/// hot path.
pub struct FileStorage {
    root: PathBuf,
    credentials: Mutex<HashMap<String, JsonValue>>,
    configs: Arc<Mutex<HashMap<String, JsonValue>>>,
    usage: Mutex<HashMap<String, UsageRecord>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    watchers: Mutex<Vec<WatcherFn>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    expires_at_unix: i64,
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
}

impl FileStorage {
    /// Creates directory structure (mode `0o700`) if missing, loads every
    /// existing record into memory, and returns the backend without
    /// starting the polling watcher — call [`FileStorage::spawn_watcher`]
    /// separately once wrapped in an `Arc`.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        for sub in ["credentials", "configs", "usage", "cache"] {
            let dir = root.join(sub);
            tokio::fs::create_dir_all(&dir).await?;
            set_dir_perms(&dir)?;
        }

        let credentials = load_namespace(&root.join("credentials")).await?;
        let configs = load_namespace(&root.join("configs")).await?;
        let usage_raw: HashMap<String, JsonValue> = load_namespace(&root.join("usage")).await?;
        let usage = usage_raw
            .into_iter()
            .filter_map(|(k, v)| serde_json::from_value(v).ok().map(|r| (k, r)))
            .collect();
        let cache_raw: HashMap<String, JsonValue> = load_namespace(&root.join("cache")).await?;
        let cache = cache_raw
            .into_iter()
            .filter_map(|(k, v)| serde_json::from_value(v).ok().map(|r| (k, r)))
            .collect();

        Ok(Self {
            root,
            credentials: Mutex::new(credentials),
            configs: Arc::new(Mutex::new(configs)),
            usage: Mutex::new(usage),
            cache: Mutex::new(cache),
            watchers: Mutex::new(Vec::new()),
        })
    }

    /// Registers a callback invoked after every polling reload that finds
    /// at least one changed credential (spec §4.4 "invokes registered
    /// watcher callbacks").
    pub async fn add_watcher(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.watchers.lock().await.push(Box::new(callback));
    }

    /// Starts the periodic reload loop at `interval` (spec §4.4 "a polling
    /// watcher with configurable interval").
    pub fn spawn_watcher(self: &Arc<Self>, interval: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match load_namespace(&this.root.join("credentials")).await {
                    Ok(fresh) => {
                        let mut changed = false;
                        {
                            let mut guard = this.credentials.lock().await;
                            if *guard != fresh {
                                *guard = fresh;
                                changed = true;
                            }
                        }
                        if changed {
                            for watcher in this.watchers.lock().await.iter() {
                                watcher();
                            }
                        }
                    }
                    Err(err) => {
                        tracing::error!(%err, "credential reload scan failed");
                    }
                }
            }
        });
    }

    fn credential_path(&self, id: &str) -> PathBuf {
        self.root.join("credentials").join(format!("{id}.json"))
    }

    fn config_path(&self, key: &str) -> PathBuf {
        self.root.join("configs").join(format!("{key}.json"))
    }

    fn usage_path(&self, key: &str) -> PathBuf {
        self.root.join("usage").join(format!("{key}.json"))
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        self.root.join("cache").join(format!("{key}.json"))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get_credential(&self, id: &str) -> StorageResult<Option<JsonValue>> {
        Ok(self.credentials.lock().await.get(id).cloned())
    }

    async fn set_credential(&self, id: &str, value: JsonValue) -> StorageResult<()> {
        write_atomic(&self.credential_path(id), &value, 0o600).await?;
        self.credentials
            .lock()
            .await
            .insert(id.to_string(), value);
        Ok(())
    }

    async fn delete_credential(&self, id: &str) -> StorageResult<()> {
        remove_if_exists(&self.credential_path(id)).await?;
        self.credentials.lock().await.remove(id);
        Ok(())
    }

    async fn list_credentials(&self) -> StorageResult<Vec<String>> {
        Ok(self.credentials.lock().await.keys().cloned().collect())
    }

    async fn get_credentials_batch(
        &self,
        ids: &[String],
    ) -> StorageResult<HashMap<String, JsonValue>> {
        let guard = self.credentials.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| guard.get(id).map(|v| (id.clone(), v.clone())))
            .collect())
    }

    async fn set_credentials_batch(&self, items: HashMap<String, JsonValue>) -> StorageResult<()> {
        for (id, value) in items.iter() {
            write_atomic(&self.credential_path(id), value, 0o600).await?;
        }
        self.credentials.lock().await.extend(items);
        Ok(())
    }

    async fn delete_credentials_batch(&self, ids: &[String]) -> StorageResult<()> {
        for id in ids {
            remove_if_exists(&self.credential_path(id)).await?;
        }
        let mut guard = self.credentials.lock().await;
        for id in ids {
            guard.remove(id);
        }
        Ok(())
    }

    async fn get_config(&self, key: &str) -> StorageResult<Option<JsonValue>> {
        Ok(self.configs.lock().await.get(key).cloned())
    }

    async fn set_config(&self, key: &str, value: JsonValue) -> StorageResult<()> {
        write_atomic(&self.config_path(key), &value, 0o644).await?;
        self.configs.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete_config(&self, key: &str) -> StorageResult<()> {
        remove_if_exists(&self.config_path(key)).await?;
        self.configs.lock().await.remove(key);
        Ok(())
    }

    async fn list_configs(&self) -> StorageResult<Vec<String>> {
        Ok(self.configs.lock().await.keys().cloned().collect())
    }

    async fn get_usage(&self, key: &str) -> StorageResult<Option<UsageRecord>> {
        Ok(self.usage.lock().await.get(key).cloned())
    }

    async fn increment_usage(&self, key: &str, field: &str, delta: i64) -> StorageResult<()> {
        let mut guard = self.usage.lock().await;
        let record = guard.entry(key.to_string()).or_default();
        *record.counters.entry(field.to_string()).or_insert(0) += delta;
        let snapshot = record.clone();
        drop(guard);
        let value = serde_json::to_value(&snapshot)?;
        write_atomic(&self.usage_path(key), &value, 0o644).await
    }

    async fn list_usage(&self) -> StorageResult<Vec<String>> {
        Ok(self.usage.lock().await.keys().cloned().collect())
    }

    async fn get_cache(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let mut guard = self.cache.lock().await;
        let Some(entry) = guard.get(key) else {
            return Ok(None);
        };
        if entry.expires_at_unix <= gw_common::now_unix() {
            guard.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.data.clone()))
    }

    async fn set_cache(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        let entry = CacheEntry {
            expires_at_unix: gw_common::now_unix() + ttl.as_secs() as i64,
            data: value,
        };
        let json = serde_json::to_value(&entry)?;
        write_atomic(&self.cache_path(key), &json, 0o644).await?;
        self.cache.lock().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete_cache(&self, key: &str) -> StorageResult<()> {
        remove_if_exists(&self.cache_path(key)).await?;
        self.cache.lock().await.remove(key);
        Ok(())
    }

    async fn begin_transaction(&self) -> StorageResult<Box<dyn ConfigTransaction>> {
        let snapshot = self.configs.lock().await.clone();
        Ok(Box::new(FileConfigTransaction {
            root: self.root.clone(),
            configs: self.configs.clone(),
            before: snapshot.clone(),
            staged: Mutex::new(snapshot),
        }))
    }

    async fn export_data(&self) -> StorageResult<ExportedData> {
        Ok(ExportedData {
            credentials: self.credentials.lock().await.clone(),
            configs: self.configs.lock().await.clone(),
            usage: self.usage.lock().await.clone(),
        })
    }

    async fn import_data(&self, data: ExportedData) -> StorageResult<()> {
        self.set_credentials_batch(data.credentials).await?;
        for (key, value) in data.configs {
            self.set_config(&key, value).await?;
        }
        for (key, record) in data.usage {
            let value = serde_json::to_value(&record)?;
            write_atomic(&self.usage_path(&key), &value, 0o644).await?;
            self.usage.lock().await.insert(key, record);
        }
        Ok(())
    }

    async fn storage_stats(&self) -> StorageResult<StorageStats> {
        Ok(StorageStats {
            backend: "file",
            credential_count: self.credentials.lock().await.len(),
            config_count: self.configs.lock().await.len(),
            usage_count: self.usage.lock().await.len(),
            cache_count: self.cache.lock().await.len(),
        })
    }

    async fn health(&self) -> StorageResult<()> {
        tokio::fs::metadata(&self.root).await?;
        Ok(())
    }
}

/// Config-scope transaction (spec §4.4 `BeginTransaction`): mutations
/// stage into an in-memory copy and only reach disk on `commit`, giving
/// all-or-nothing apply semantics without a real database.
struct FileConfigTransaction {
    root: PathBuf,
    configs: Arc<Mutex<HashMap<String, JsonValue>>>,
    before: HashMap<String, JsonValue>,
    staged: Mutex<HashMap<String, JsonValue>>,
}

impl FileConfigTransaction {
    fn config_path(&self, key: &str) -> PathBuf {
        self.root.join("configs").join(format!("{key}.json"))
    }
}

#[async_trait]
impl ConfigTransaction for FileConfigTransaction {
    async fn get_config(&self, key: &str) -> StorageResult<Option<JsonValue>> {
        Ok(self.staged.lock().await.get(key).cloned())
    }

    async fn set_config(&self, key: &str, value: JsonValue) -> StorageResult<()> {
        self.staged.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete_config(&self, key: &str) -> StorageResult<()> {
        self.staged.lock().await.remove(key);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let staged = self.staged.into_inner();
        for key in self.before.keys() {
            if !staged.contains_key(key) {
                remove_if_exists(&self.config_path(key)).await?;
            }
        }
        for (key, value) in staged.iter() {
            write_atomic(&self.config_path(key), value, 0o644).await?;
        }
        // Publish the committed set into `FileStorage.configs` so `get_config`/
        // `list_configs` observe the change immediately, not just after the
        // next poll reload (spec §4.4 `BeginTransaction`).
        *self.configs.lock().await = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

async fn load_namespace<T>(dir: &Path) -> StorageResult<HashMap<String, T>>
where
    T: for<'de> Deserialize<'de>,
{
    let mut out = HashMap::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(StorageError::Transport(err)),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let raw = tokio::fs::read_to_string(&path).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => {
                out.insert(stem.to_string(), value);
            }
            Err(err) => {
                tracing::error!(path = %path.display(), %err, "skipping unparseable storage record");
            }
        }
    }
    Ok(out)
}

async fn write_atomic(path: &Path, value: &JsonValue, mode: u32) -> StorageResult<()> {
    let parent = path.parent().expect("namespace paths always have a parent");
    tokio::fs::create_dir_all(parent).await?;
    set_dir_perms(parent)?;

    let tmp_path = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("entry"),
        std::process::id()
    ));
    let body = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(&tmp_path, &body).await?;
    set_file_perms(&tmp_path, mode)?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StorageError::Transport(err)),
    }
}

#[cfg(unix)]
fn set_dir_perms(path: &Path) -> StorageResult<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_dir_perms(_path: &Path) -> StorageResult<()> {
    Ok(())
}

#[cfg(unix)]
fn set_file_perms(path: &Path, mode: u32) -> StorageResult<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_perms(_path: &Path, _mode: u32) -> StorageResult<()> {
    Ok(())
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        STANDARD
            .decode(raw.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_credential() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        storage
            .set_credential("cred-1", serde_json::json!({"type": "oauth"}))
            .await
            .unwrap();
        let loaded = storage.get_credential("cred-1").await.unwrap();
        assert_eq!(loaded, Some(serde_json::json!({"type": "oauth"})));

        let reopened = FileStorage::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.get_credential("cred-1").await.unwrap(),
            Some(serde_json::json!({"type": "oauth"}))
        );
    }

    #[tokio::test]
    async fn increment_usage_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        storage.increment_usage("key-1", "requests", 1).await.unwrap();
        storage.increment_usage("key-1", "requests", 4).await.unwrap();
        let record = storage.get_usage("key-1").await.unwrap().unwrap();
        assert_eq!(record.counters.get("requests"), Some(&5));
    }

    #[tokio::test]
    async fn cache_entry_expires() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        storage
            .set_cache("k", b"v".to_vec(), Duration::from_secs(0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(storage.get_cache("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn transaction_commit_persists_and_rollback_discards() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();

        let txn = storage.begin_transaction().await.unwrap();
        txn.set_config("a", serde_json::json!(1)).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(
            storage.get_config("a").await.unwrap(),
            Some(serde_json::json!(1))
        );

        let txn = storage.begin_transaction().await.unwrap();
        txn.set_config("b", serde_json::json!(2)).await.unwrap();
        txn.rollback().await.unwrap();
        assert_eq!(storage.get_config("b").await.unwrap(), None);
    }
}
