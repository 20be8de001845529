use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gw_common::{time_util::now_unix, CredentialId};
use gw_storage::Storage;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{CredentialError, CredentialResult};
use crate::health::record_outcome;
use crate::model::Credential;
use crate::refresh::{OAuthRefresher, RefreshOutcome};

type WatcherFn = dyn Fn(&Credential) + Send + Sync;

/// Default timeout for a single in-flight refresh before a waiter gives up
/// and observes the (possibly stale) credential instead (spec §4.6
/// `RefreshSingleflightTimeoutSec`, default 10s).
pub const DEFAULT_REFRESH_SINGLEFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

/// Authoritative credential set and per-credential health state (spec
/// §4.6). Owns persistence through `Storage` and single-flights
/// concurrent refreshes for the same credential ID.
pub struct CredentialStore {
    storage: Arc<dyn Storage>,
    refresher: Arc<dyn OAuthRefresher>,
    credentials: RwLock<HashMap<CredentialId, Credential>>,
    in_flight: RwLock<HashMap<CredentialId, u32>>,
    refresh_locks: Mutex<HashMap<CredentialId, Arc<Mutex<()>>>>,
    watchers: RwLock<Vec<Arc<WatcherFn>>>,
    max_concurrent_per_credential: u32,
    refresh_timeout: Duration,
    auto_ban_thresholds: HashMap<u16, u32>,
}

impl CredentialStore {
    pub fn new(
        storage: Arc<dyn Storage>,
        refresher: Arc<dyn OAuthRefresher>,
        max_concurrent_per_credential: u32,
        auto_ban_thresholds: HashMap<u16, u32>,
    ) -> Self {
        Self {
            storage,
            refresher,
            credentials: RwLock::new(HashMap::new()),
            in_flight: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
            watchers: RwLock::new(Vec::new()),
            max_concurrent_per_credential,
            refresh_timeout: DEFAULT_REFRESH_SINGLEFLIGHT_TIMEOUT,
            auto_ban_thresholds,
        }
    }

    /// Loads every credential blob from storage into the in-memory map
    /// (spec §4.6 `LoadCredentials`).
    pub async fn load_credentials(&self) -> CredentialResult<()> {
        let ids = self.storage.list_credentials().await?;
        let mut loaded = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(value) = self.storage.get_credential(&id).await? {
                match serde_json::from_value::<Credential>(value) {
                    Ok(cred) => {
                        loaded.insert(cred.id.clone(), cred);
                    }
                    Err(err) => {
                        warn!(credential_id = %id, error = %err, "failed to parse stored credential");
                    }
                }
            }
        }
        let count = loaded.len();
        *self.credentials.write().await = loaded;
        debug!(count, "loaded credentials from storage");
        Ok(())
    }

    pub async fn get_all_credentials(&self) -> Vec<Credential> {
        self.credentials.read().await.values().cloned().collect()
    }

    pub async fn get_credential_by_id(&self, id: &CredentialId) -> Option<Credential> {
        self.credentials.read().await.get(id).cloned()
    }

    pub async fn upsert(&self, credential: Credential) -> CredentialResult<()> {
        self.storage
            .set_credential(credential.id.as_str(), serde_json::to_value(&credential)?)
            .await?;
        let mut guard = self.credentials.write().await;
        guard.insert(credential.id.clone(), credential.clone());
        drop(guard);
        self.notify_watchers(&credential).await;
        Ok(())
    }

    /// `HasCapacity` (spec §4.6): checks the configured
    /// `MaxConcurrentPerCredential` against the current in-flight count for
    /// `id`. `0` means unbounded.
    pub async fn has_capacity(&self, id: &CredentialId) -> bool {
        if self.max_concurrent_per_credential == 0 {
            return true;
        }
        let guard = self.in_flight.read().await;
        guard.get(id).copied().unwrap_or(0) < self.max_concurrent_per_credential
    }

    /// Reserves one in-flight slot for `id`; pair with [`Self::release`].
    /// Callers typically wrap this in a guard (see `gw-router`).
    pub async fn acquire(&self, id: &CredentialId) {
        let mut guard = self.in_flight.write().await;
        *guard.entry(id.clone()).or_insert(0) += 1;
    }

    pub async fn release(&self, id: &CredentialId) {
        let mut guard = self.in_flight.write().await;
        if let Some(count) = guard.get_mut(id) {
            *count = count.saturating_sub(1);
        }
    }

    /// `RefreshCredential` (spec §4.6): single-flights concurrent refreshes
    /// for the same ID via a per-ID lock, matching the teacher's
    /// `TOKEN_CACHE` pattern but scoped per call rather than process-global.
    /// A waiter that acquires the lock after another refresh already
    /// completed observes the now-fresh `updated_at` and skips its own
    /// network call, collapsing concurrent refreshes into one exchange.
    pub async fn refresh_credential(&self, id: &CredentialId) -> CredentialResult<Credential> {
        let lock = {
            let mut locks = self.refresh_locks.lock().await;
            locks
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let before = self
            .get_credential_by_id(id)
            .await
            .ok_or_else(|| CredentialError::NotFound(id.clone()))?;
        let call_started_at = now_unix();

        let _guard = match tokio::time::timeout(self.refresh_timeout, lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(credential_id = %id, "refresh single-flight timed out waiting for lock");
                return Ok(before);
            }
        };

        // Someone else refreshed while we were waiting for the lock.
        if let Some(current) = self.get_credential_by_id(id).await {
            if current.updated_at > before.updated_at && current.updated_at >= call_started_at {
                return Ok(current);
            }
        }

        let now = now_unix();
        let outcome = self.refresher.refresh(&before, now).await;

        match outcome {
            Ok(refreshed) => {
                let mut guard = self.credentials.write().await;
                let entry = guard
                    .get_mut(id)
                    .ok_or_else(|| CredentialError::NotFound(id.clone()))?;
                entry.access_token = Some(refreshed.access_token);
                entry.expires_at = Some(refreshed.expires_at);
                entry.updated_at = now;
                let updated = entry.clone();
                drop(guard);
                let _ = self
                    .storage
                    .set_credential(id.as_str(), serde_json::to_value(&updated)?)
                    .await;
                self.notify_watchers(&updated).await;
                Ok(updated)
            }
            Err(err) => {
                warn!(credential_id = %id, error = %err, "refresh failed, keeping stale credential");
                let mut guard = self.credentials.write().await;
                if let Some(entry) = guard.get_mut(id) {
                    entry.health.last_failure = Some(now);
                    entry.health.failure_reason = Some(err.to_string());
                }
                guard
                    .get(id)
                    .cloned()
                    .ok_or_else(|| CredentialError::NotFound(id.clone()))
            }
        }
    }

    /// Records a request outcome's effect on health/usage accounting (spec
    /// §4.6 health scoring). Routing-level cooldown/strike bookkeeping
    /// lives in `gw-router`; this only updates the credential's own
    /// counters.
    pub async fn record_outcome(&self, id: &CredentialId, status: u16, response_time_ms: f64) {
        let mut guard = self.credentials.write().await;
        if let Some(cred) = guard.get_mut(id) {
            record_outcome(
                &mut cred.health,
                status,
                now_unix(),
                response_time_ms,
                &self.auto_ban_thresholds,
            );
        }
    }

    pub async fn update_usage_stats(&self, id: &CredentialId, field: &str, delta: i64) {
        let mut guard = self.credentials.write().await;
        if let Some(cred) = guard.get_mut(id) {
            *cred.health.usage_stats.entry(field.to_string()).or_insert(0) += delta;
            if field == "daily_usage" && delta > 0 {
                cred.health.daily_usage = cred.health.daily_usage.saturating_add(delta as u64);
            }
        }
    }

    pub async fn enable_credentials(&self, ids: &[CredentialId]) {
        self.set_disabled(ids, false).await;
    }

    pub async fn disable_credentials(&self, ids: &[CredentialId]) {
        self.set_disabled(ids, true).await;
    }

    async fn set_disabled(&self, ids: &[CredentialId], disabled: bool) {
        let mut guard = self.credentials.write().await;
        for id in ids {
            if let Some(cred) = guard.get_mut(id) {
                cred.health.disabled = disabled;
            }
        }
    }

    pub async fn add_watcher(&self, watcher: Arc<WatcherFn>) {
        self.watchers.write().await.push(watcher);
    }

    async fn notify_watchers(&self, credential: &Credential) {
        let watchers = self.watchers.read().await.clone();
        for watcher in watchers {
            watcher(credential);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CredentialType;
    use crate::refresh::OAuthRefresher;
    use async_trait::async_trait;
    use gw_storage::FileStorage;

    struct AlwaysFailRefresher;
    #[async_trait]
    impl OAuthRefresher for AlwaysFailRefresher {
        async fn refresh(&self, _: &Credential, _: i64) -> CredentialResult<RefreshOutcome> {
            Err(CredentialError::RefreshMissingAccessToken)
        }
    }

    struct AlwaysOkRefresher;
    #[async_trait]
    impl OAuthRefresher for AlwaysOkRefresher {
        async fn refresh(&self, _: &Credential, now: i64) -> CredentialResult<RefreshOutcome> {
            Ok(RefreshOutcome {
                access_token: "fresh".to_string(),
                expires_at: now + 3600,
            })
        }
    }

    async fn store_with(refresher: Arc<dyn OAuthRefresher>) -> (CredentialStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());
        let store = CredentialStore::new(storage, refresher, 2, HashMap::new());
        (store, dir)
    }

    #[tokio::test]
    async fn capacity_is_unbounded_when_limit_zero() {
        let (store, _dir) = store_with(Arc::new(AlwaysOkRefresher)).await;
        let store = CredentialStore::new(
            Arc::new(FileStorage::open(store_tempdir().path()).await.unwrap()),
            Arc::new(AlwaysOkRefresher),
            0,
            HashMap::new(),
        );
        let id = CredentialId::new("c1");
        for _ in 0..10 {
            store.acquire(&id).await;
        }
        assert!(store.has_capacity(&id).await);
    }

    fn store_tempdir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[tokio::test]
    async fn capacity_enforced_and_released() {
        let (store, _dir) = store_with(Arc::new(AlwaysOkRefresher)).await;
        let id = CredentialId::new("c1");
        store.acquire(&id).await;
        store.acquire(&id).await;
        assert!(!store.has_capacity(&id).await);
        store.release(&id).await;
        assert!(store.has_capacity(&id).await);
    }

    #[tokio::test]
    async fn refresh_failure_keeps_stale_credential() {
        let (store, _dir) = store_with(Arc::new(AlwaysFailRefresher)).await;
        let mut cred = Credential::new(CredentialId::new("c1"), CredentialType::Oauth, 0);
        cred.refresh_token = Some("rt".to_string());
        store.upsert(cred.clone()).await.unwrap();

        let result = store.refresh_credential(&cred.id).await.unwrap();
        assert_eq!(result.access_token, None);
        assert!(result.health.failure_reason.is_some());
    }

    #[tokio::test]
    async fn refresh_success_swaps_access_token() {
        let (store, _dir) = store_with(Arc::new(AlwaysOkRefresher)).await;
        let mut cred = Credential::new(CredentialId::new("c1"), CredentialType::Oauth, 0);
        cred.refresh_token = Some("rt".to_string());
        store.upsert(cred.clone()).await.unwrap();

        let result = store.refresh_credential(&cred.id).await.unwrap();
        assert_eq!(result.access_token.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn disable_and_enable_round_trip() {
        let (store, _dir) = store_with(Arc::new(AlwaysOkRefresher)).await;
        let cred = Credential::new(CredentialId::new("c1"), CredentialType::Oauth, 0);
        store.upsert(cred.clone()).await.unwrap();

        store.disable_credentials(&[cred.id.clone()]).await;
        assert!(
            !store
                .get_credential_by_id(&cred.id)
                .await
                .unwrap()
                .is_eligible()
        );

        store.enable_credentials(&[cred.id.clone()]).await;
        assert!(
            store
                .get_credential_by_id(&cred.id)
                .await
                .unwrap()
                .is_eligible()
        );
    }
}
