use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use gw_common::CredentialId;
use gw_config::RoutingConfig;
use gw_credential::{is_retryable_failure_status, Credential, CredentialStore};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cooldown::{cooldown_duration, on_failure, on_success, CooldownEntry};
use crate::pick_log::{PickLogEntry, PickLogRing};
use crate::sticky::derive_sticky_key;

#[derive(Debug, Clone)]
struct StickyEntry {
    credential_id: CredentialId,
    expires: Instant,
}

/// Point-in-time cooldown state for observability/persistence (spec §4.1
/// `Snapshot`, §6.3 `routing_state`). `remaining_secs` is deliberately
/// monotonic-clock-free so the assembly service can persist/restore it
/// across process restarts without caring about `Instant` representation.
#[derive(Debug, Clone)]
pub struct CooldownInfo {
    pub credential_id: CredentialId,
    pub strikes: u32,
    pub remaining_secs: u64,
}

struct RoutingMaps {
    sticky: HashMap<String, StickyEntry>,
    cooldowns: HashMap<CredentialId, CooldownEntry>,
    pick_log: PickLogRing,
}

/// Credential routing strategy (spec §4.1): sticky-session affinity,
/// power-of-two-choices weighted selection, cooldowns, and refresh-ahead.
///
/// The sticky map and cooldown map share a single mutex (spec §5 "single
/// mutex guarding both"); the lock is never held across an `.await` on
/// credential-store or upstream I/O, only for in-memory map edits.
pub struct RoutingStrategy {
    store: Arc<CredentialStore>,
    config: ArcSwap<RoutingConfig>,
    maps: Mutex<RoutingMaps>,
    tiebreak: AtomicUsize,
}

impl RoutingStrategy {
    pub fn new(store: Arc<CredentialStore>, config: RoutingConfig) -> Self {
        let pick_log_capacity = config.pick_log_capacity;
        Self {
            store,
            config: ArcSwap::from_pointee(config),
            maps: Mutex::new(RoutingMaps {
                sticky: HashMap::new(),
                cooldowns: HashMap::new(),
                pick_log: PickLogRing::new(pick_log_capacity),
            }),
            tiebreak: AtomicUsize::new(0),
        }
    }

    pub fn update_config(&self, config: RoutingConfig) {
        self.config.store(Arc::new(config));
    }

    pub async fn pick(&self, headers: &HashMap<String, String>) -> Option<Credential> {
        self.pick_with_info(headers).await.0
    }

    /// `PickWithInfo` (spec §4.1): selects one live, uncooled, capacity-
    /// bearing credential, preferring sticky affinity, and returns the
    /// structured pick-log entry alongside it.
    pub async fn pick_with_info(
        &self,
        headers: &HashMap<String, String>,
    ) -> (Option<Credential>, Option<PickLogEntry>) {
        let config = self.config.load_full();
        let all_creds = self.store.get_all_credentials().await;

        let mut capacity = HashMap::with_capacity(all_creds.len());
        for cred in &all_creds {
            capacity.insert(cred.id.clone(), self.store.has_capacity(&cred.id).await);
        }

        let sticky_key = derive_sticky_key(headers);
        let now = Instant::now();

        let (chosen_id, sticky_hit, considered, log_entry) = {
            let mut maps = self.maps.lock().await;
            let mut sticky_hit = false;
            let mut chosen_id: Option<CredentialId> = None;

            if let Some(key) = &sticky_key {
                if let Some(entry) = maps.sticky.get(key).cloned() {
                    let still_valid = entry.expires > now
                        && all_creds
                            .iter()
                            .any(|c| c.id == entry.credential_id && c.is_eligible())
                        && !maps
                            .cooldowns
                            .get(&entry.credential_id)
                            .map(|e| e.is_active(now))
                            .unwrap_or(false)
                        && capacity.get(&entry.credential_id).copied().unwrap_or(false);
                    if still_valid {
                        chosen_id = Some(entry.credential_id.clone());
                        sticky_hit = true;
                    } else {
                        maps.sticky.remove(key);
                    }
                }
            }

            if chosen_id.is_none() {
                let candidates: Vec<&Credential> = all_creds
                    .iter()
                    .filter(|c| {
                        c.is_eligible()
                            && !maps
                                .cooldowns
                                .get(&c.id)
                                .map(|e| e.is_active(now))
                                .unwrap_or(false)
                            && capacity.get(&c.id).copied().unwrap_or(false)
                    })
                    .collect();

                chosen_id = self.select_candidate(&candidates);

                if let (Some(id), Some(key)) = (&chosen_id, &sticky_key) {
                    maps.sticky.insert(
                        key.clone(),
                        StickyEntry {
                            credential_id: id.clone(),
                            expires: now + Duration::from_secs(config.sticky_ttl_secs),
                        },
                    );
                }
            }

            let entry = PickLogEntry {
                at: now,
                credential_id: chosen_id.clone(),
                sticky_hit,
                candidates_considered: all_creds.len(),
            };
            maps.pick_log.push(entry.clone());
            (chosen_id, sticky_hit, all_creds.len(), entry)
        };

        debug!(
            sticky_hit,
            considered,
            credential_id = chosen_id.as_ref().map(|c| c.as_str()),
            "routing pick"
        );

        let Some(id) = chosen_id else {
            return (None, Some(log_entry));
        };
        let Some(cred) = self.store.get_credential_by_id(&id).await else {
            return (None, Some(log_entry));
        };
        let prepared = self.prepare_credential(cred).await;
        (Some(prepared), Some(log_entry))
    }

    /// Power-of-two-choices over `candidates` (spec §4.1 step 4): sample
    /// two distinct candidates using a process-local monotonic counter,
    /// return the higher-scored one, breaking ties by the first sampled.
    fn select_candidate(&self, candidates: &[&Credential]) -> Option<CredentialId> {
        match candidates.len() {
            0 => None,
            1 => Some(candidates[0].id.clone()),
            n => {
                let counter = self.tiebreak.fetch_add(1, Ordering::Relaxed);
                let i = counter % n;
                let offset = 1 + (counter / n) % (n - 1);
                let j = (i + offset) % n;
                let score_i = candidates[i].health.score();
                let score_j = candidates[j].health.score();
                if score_j > score_i {
                    Some(candidates[j].id.clone())
                } else {
                    Some(candidates[i].id.clone())
                }
            }
        }
    }

    /// `PrepareCredential` (spec §4.1): refresh-ahead for OAuth credentials
    /// within the configured window of expiry (default 180s) or missing an
    /// access token entirely. Refresh failures are swallowed; the caller
    /// receives the possibly-stale credential (spec §4.1 "Failure
    /// semantics").
    pub async fn prepare_credential(&self, credential: Credential) -> Credential {
        use gw_credential::CredentialType;
        if credential.kind != CredentialType::Oauth || credential.refresh_token.is_none() {
            return credential;
        }
        let config = self.config.load();
        let now = gw_common::time_util::now_unix();
        let needs_refresh = credential.access_token.is_none()
            || match credential.expires_at {
                None => true,
                Some(exp) => exp - now <= config.refresh_ahead_secs,
            };
        if !needs_refresh {
            return credential;
        }
        match self.store.refresh_credential(&credential.id).await {
            Ok(refreshed) => refreshed,
            Err(err) => {
                warn!(credential_id = %credential.id, error = %err, "refresh-ahead failed, returning stale credential");
                credential
            }
        }
    }

    /// `Compensate401` (spec §4.1): forced refresh triggered by the caller
    /// when upstream returns 401.
    pub async fn compensate_401(&self, credential_id: &CredentialId) -> (Option<Credential>, bool) {
        match self.store.refresh_credential(credential_id).await {
            Ok(refreshed) => (Some(refreshed), true),
            Err(_) => (self.store.get_credential_by_id(credential_id).await, false),
        }
    }

    /// `OnResult` (spec §4.1): updates the cooldown map per the retryable-
    /// failure / success branches. Neutral for any other status.
    pub async fn on_result(&self, credential_id: &CredentialId, status: u16) {
        let config = self.config.load();
        let now = Instant::now();
        let mut maps = self.maps.lock().await;
        if is_retryable_failure_status(status) {
            let existing = maps.cooldowns.get(credential_id).copied();
            let entry = on_failure(existing, config.cooldown_base_ms, config.cooldown_max_ms, now);
            debug!(credential_id = %credential_id, strikes = entry.strikes, status, "cooldown applied");
            maps.cooldowns.insert(credential_id.clone(), entry);
        } else if (200..400).contains(&status) {
            let existing = maps.cooldowns.remove(credential_id);
            if let Some(updated) = on_success(existing, now) {
                maps.cooldowns.insert(credential_id.clone(), updated);
            }
        }
    }

    pub async fn set_cooldown(&self, credential_id: CredentialId, strikes: u32, remaining_secs: u64) {
        let mut maps = self.maps.lock().await;
        maps.cooldowns.insert(
            credential_id,
            CooldownEntry {
                strikes: strikes.max(1),
                until: Instant::now() + Duration::from_secs(remaining_secs),
            },
        );
    }

    pub async fn clear_cooldown(&self, credential_id: &CredentialId) {
        self.maps.lock().await.cooldowns.remove(credential_id);
    }

    pub async fn clear_all_cooldowns(&self) {
        self.maps.lock().await.cooldowns.clear();
    }

    /// `Snapshot` (spec §4.1): point-in-time sticky-map size and cooldown
    /// report.
    pub async fn snapshot(&self) -> (usize, Vec<CooldownInfo>) {
        let now = Instant::now();
        let maps = self.maps.lock().await;
        let sticky_count = maps.sticky.values().filter(|e| e.expires > now).count();
        let cooldowns = maps
            .cooldowns
            .iter()
            .filter(|(_, entry)| entry.is_active(now))
            .map(|(id, entry)| CooldownInfo {
                credential_id: id.clone(),
                strikes: entry.strikes,
                remaining_secs: entry.until.saturating_duration_since(now).as_secs(),
            })
            .collect();
        (sticky_count, cooldowns)
    }

    pub fn tiebreak_duration(&self, strikes: u32) -> Duration {
        let config = self.config.load();
        cooldown_duration(strikes, config.cooldown_base_ms, config.cooldown_max_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gw_credential::{CredentialError, CredentialType, OAuthRefresher, RefreshOutcome};
    use gw_storage::FileStorage;

    struct NoopRefresher;
    #[async_trait]
    impl OAuthRefresher for NoopRefresher {
        async fn refresh(&self, _: &Credential, now: i64) -> Result<RefreshOutcome, CredentialError> {
            Ok(RefreshOutcome {
                access_token: "refreshed".to_string(),
                expires_at: now + 3600,
            })
        }
    }

    async fn strategy_with_two_equal_creds() -> (RoutingStrategy, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());
        let store = Arc::new(CredentialStore::new(
            storage,
            Arc::new(NoopRefresher),
            0,
            HashMap::new(),
        ));
        for name in ["c1", "c2"] {
            let mut cred = Credential::new(CredentialId::new(name), CredentialType::ApiKey, 0);
            cred.api_key = Some("k".to_string());
            store.upsert(cred).await.unwrap();
        }
        let strategy = RoutingStrategy::new(store, RoutingConfig::default());
        (strategy, dir)
    }

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn empty_pool_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());
        let store = Arc::new(CredentialStore::new(
            storage,
            Arc::new(NoopRefresher),
            0,
            HashMap::new(),
        ));
        let strategy = RoutingStrategy::new(store, RoutingConfig::default());
        assert!(strategy.pick(&HashMap::new()).await.is_none());
    }

    #[tokio::test]
    async fn sticky_routing_returns_same_credential_within_ttl() {
        let (strategy, _dir) = strategy_with_two_equal_creds().await;
        let h = headers(&[("authorization", "Bearer abc")]);
        let first = strategy.pick(&h).await.unwrap();
        let second = strategy.pick(&h).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn sticky_routing_switches_after_cooldown() {
        let (strategy, _dir) = strategy_with_two_equal_creds().await;
        let h = headers(&[("authorization", "Bearer abc")]);
        let first = strategy.pick(&h).await.unwrap();
        strategy.set_cooldown(first.id.clone(), 1, 60).await;
        let second = strategy.pick(&h).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn single_eligible_candidate_in_cooldown_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());
        let store = Arc::new(CredentialStore::new(
            storage,
            Arc::new(NoopRefresher),
            0,
            HashMap::new(),
        ));
        let mut cred = Credential::new(CredentialId::new("only"), CredentialType::ApiKey, 0);
        cred.api_key = Some("k".to_string());
        store.upsert(cred.clone()).await.unwrap();
        let strategy = RoutingStrategy::new(store, RoutingConfig::default());
        strategy.set_cooldown(cred.id, 1, 60).await;
        assert!(strategy.pick(&HashMap::new()).await.is_none());
    }

    #[tokio::test]
    async fn on_result_success_clears_cooldown() {
        let (strategy, _dir) = strategy_with_two_equal_creds().await;
        let id = CredentialId::new("c1");
        strategy.set_cooldown(id.clone(), 1, 60).await;
        strategy.on_result(&id, 200).await;
        let (_, cooldowns) = strategy.snapshot().await;
        assert!(cooldowns.iter().all(|c| c.credential_id != id));
    }

    #[tokio::test]
    async fn on_result_failure_applies_cooldown() {
        let (strategy, _dir) = strategy_with_two_equal_creds().await;
        let id = CredentialId::new("c1");
        strategy.on_result(&id, 429).await;
        let (_, cooldowns) = strategy.snapshot().await;
        assert!(cooldowns.iter().any(|c| c.credential_id == id && c.strikes == 1));
    }
}
