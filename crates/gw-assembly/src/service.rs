use std::collections::HashMap;
use std::sync::Arc;

use gw_common::CredentialId;
use gw_router::RoutingStrategy;
use gw_storage::Storage;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{AssemblyError, AssemblyResult};
use crate::model::{
    diff_channels, sanitize_plan_name, Diff, ModelChannels, Plan, PlanBackup, PlanInclude,
    RegistryEntry, VariantConfig,
};
use crate::variants::generate_variants_for_channel;

const KEY_REGISTRY_OPENAI: &str = "model_registry_openai";
const KEY_REGISTRY_GEMINI: &str = "model_registry_gemini";
const KEY_VARIANT_CONFIG: &str = "model_variant_config";
const KEY_ROUTING_STATE: &str = "routing_state";

fn plan_key(name: &str) -> String {
    format!("assembly_plan:{name}")
}

fn backup_key(name: &str) -> String {
    format!("assembly_plan_backup:{name}")
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct RoutingStateCooldown {
    credential_id: String,
    strikes: u32,
    remaining_sec: u64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct RoutingState {
    cooldowns: Vec<RoutingStateCooldown>,
    saved_at: i64,
}

/// The assembly service (spec §4.3): safe, auditable, idempotent mutation
/// of the exposed model registry and variant config, with plan/diff/apply/
/// rollback semantics and a capability-probed storage apply path.
///
/// Per-plan-name locking keeps concurrent `ApplyPlan`/`RollbackPlan` calls
/// for the same name from interleaving their backup-then-write sequence;
/// different plan names proceed independently.
pub struct AssemblyService {
    storage: Arc<dyn Storage>,
    router: Option<Arc<RoutingStrategy>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AssemblyService {
    pub fn new(storage: Arc<dyn Storage>, router: Option<Arc<RoutingStrategy>>) -> Self {
        Self {
            storage,
            router,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_entries(&self, key: &str) -> AssemblyResult<Vec<RegistryEntry>> {
        match self.storage.get_config(key).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn read_variant_config(&self) -> AssemblyResult<VariantConfig> {
        match self.storage.get_config(KEY_VARIANT_CONFIG).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(VariantConfig::default()),
        }
    }

    async fn current_channels(&self) -> AssemblyResult<ModelChannels> {
        Ok(ModelChannels {
            openai: self.read_entries(KEY_REGISTRY_OPENAI).await?,
            gemini: self.read_entries(KEY_REGISTRY_GEMINI).await?,
        })
    }

    /// `GET /models/registry` (spec §6.2): the raw registry entries for one
    /// channel (`"openai"` or `"gemini"`; anything else reads as empty).
    pub async fn registry(&self, channel: &str) -> AssemblyResult<Vec<RegistryEntry>> {
        match channel {
            "openai" => self.read_entries(KEY_REGISTRY_OPENAI).await,
            "gemini" => self.read_entries(KEY_REGISTRY_GEMINI).await,
            _ => Ok(Vec::new()),
        }
    }

    /// `PUT /models/registry` / `POST /models/registry/import` (spec §6.2).
    pub async fn set_registry(&self, channel: &str, entries: Vec<RegistryEntry>) -> AssemblyResult<()> {
        let key = match channel {
            "openai" => KEY_REGISTRY_OPENAI,
            "gemini" => KEY_REGISTRY_GEMINI,
            other => return Err(AssemblyError::TransactionFailed(format!("unknown channel {other}"))),
        };
        self.storage.set_config(key, serde_json::to_value(&entries)?).await?;
        Ok(())
    }

    /// `POST/PUT/DELETE /models/registry/:id` (spec §6.2): mutate a single
    /// entry within a channel's registry by ID.
    pub async fn upsert_registry_entry(&self, channel: &str, entry: RegistryEntry) -> AssemblyResult<()> {
        let mut entries = self.registry(channel).await?;
        if let Some(existing) = entries.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry;
        } else {
            entries.push(entry);
        }
        self.set_registry(channel, entries).await
    }

    pub async fn delete_registry_entry(&self, channel: &str, id: &str) -> AssemblyResult<()> {
        let mut entries = self.registry(channel).await?;
        entries.retain(|e| e.id != id);
        self.set_registry(channel, entries).await
    }

    /// `GET /models/variant-config` (spec §6.2).
    pub async fn variant_config(&self) -> AssemblyResult<VariantConfig> {
        self.read_variant_config().await
    }

    /// `PUT /models/variant-config` (spec §6.2, §3.5).
    pub async fn set_variant_config(&self, config: VariantConfig) -> AssemblyResult<()> {
        self.storage
            .set_config(KEY_VARIANT_CONFIG, serde_json::to_value(&config)?)
            .await?;
        Ok(())
    }

    /// `GET /models/generate-variants` (spec §3.4, §3.5, §6.2): derives
    /// every variant of every base entry on `channel` from the current
    /// variant config, without persisting anything.
    pub async fn generate_variants(&self, channel: &str) -> AssemblyResult<Vec<RegistryEntry>> {
        let bases = self.registry(channel).await?;
        let config = self.read_variant_config().await?;
        Ok(generate_variants_for_channel(&bases, &config))
    }

    /// `Snapshot` (spec §4.3): current `{models:{openai,gemini},
    /// variant_config}`.
    pub async fn snapshot(&self) -> AssemblyResult<Plan> {
        Ok(Plan {
            models: self.current_channels().await?,
            variant_config: self.read_variant_config().await?,
        })
    }

    /// `SavePlan(name, include)` (spec §4.3): writes `assembly_plan:<name>`
    /// from the current snapshot, honoring the `include` flags.
    pub async fn save_plan(&self, name: &str, include: PlanInclude) -> AssemblyResult<String> {
        let sanitized = sanitize_plan_name(name);
        let snapshot = self.snapshot().await?;
        let plan = Plan {
            models: if include.models {
                snapshot.models
            } else {
                ModelChannels::default()
            },
            variant_config: if include.variants {
                snapshot.variant_config
            } else {
                VariantConfig::default()
            },
        };
        self.storage
            .set_config(&plan_key(&sanitized), serde_json::to_value(&plan)?)
            .await?;
        debug!(plan = %sanitized, "saved assembly plan");
        Ok(sanitized)
    }

    pub async fn list_plans(&self) -> AssemblyResult<Vec<String>> {
        let keys = self.storage.list_configs().await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix("assembly_plan:").map(|s| s.to_string()))
            .collect())
    }

    pub async fn get_plan(&self, name: &str) -> AssemblyResult<Plan> {
        let sanitized = sanitize_plan_name(name);
        let value = self
            .storage
            .get_config(&plan_key(&sanitized))
            .await?
            .ok_or_else(|| AssemblyError::PlanNotFound(sanitized.clone()))?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn delete_plan(&self, name: &str) -> AssemblyResult<()> {
        let sanitized = sanitize_plan_name(name);
        self.storage.delete_config(&plan_key(&sanitized)).await?;
        Ok(())
    }

    async fn get_backup(&self, name: &str) -> AssemblyResult<PlanBackup> {
        let sanitized = sanitize_plan_name(name);
        let value = self
            .storage
            .get_config(&backup_key(&sanitized))
            .await?
            .ok_or_else(|| AssemblyError::BackupNotFound(sanitized.clone()))?;
        Ok(serde_json::from_value(value)?)
    }

    /// `DiffPlan(plan)` (spec §4.3): diff an inline plan against current
    /// state without touching storage.
    pub async fn diff_plan(&self, plan: &Plan) -> AssemblyResult<Diff> {
        let current = self.current_channels().await?;
        let current_variant = self.read_variant_config().await?;
        Ok(diff_channels(&current, &plan.models, &current_variant, &plan.variant_config))
    }

    /// `DiffApply(name)` (spec §4.3): diff between current exposed IDs and
    /// the named plan's target IDs.
    pub async fn diff_apply(&self, name: &str) -> AssemblyResult<Diff> {
        let plan = self.get_plan(name).await?;
        self.diff_plan(&plan).await
    }

    /// `DiffRollback(name)` (spec §4.3): diff between current exposed IDs
    /// and the named plan's backup target IDs.
    pub async fn diff_rollback(&self, name: &str) -> AssemblyResult<Diff> {
        let backup = self.get_backup(name).await?;
        let current = self.current_channels().await?;
        let current_variant = self.read_variant_config().await?;
        let target = ModelChannels {
            openai: backup.models_openai,
            gemini: backup.models_gemini,
        };
        Ok(diff_channels(&current, &target, &current_variant, &backup.variant_config))
    }

    /// `ApplyPlan(name)` (spec §4.3, algorithm in §4.3 "Apply algorithm"):
    ///
    /// 1. Read current registry for both channels and current
    ///    variant_config; persist as `assembly_plan_backup:<name>` with a
    ///    timestamp.
    /// 2. Derive the list of updates.
    /// 3. Prefer a storage transaction; fall back to batch apply; fall
    ///    back to one-at-a-time with reverse-order restore on failure.
    pub async fn apply_plan(&self, name: &str) -> AssemblyResult<Diff> {
        let sanitized = sanitize_plan_name(name);
        let lock = self.lock_for(&sanitized).await;
        let _guard = lock.lock().await;

        let plan = self.get_plan(&sanitized).await?;
        let diff = self.diff_plan(&plan).await?;

        let current_channels = self.current_channels().await?;
        let current_variant = self.read_variant_config().await?;
        let backup = PlanBackup {
            ts: gw_common::time_util::now_unix(),
            models_openai: current_channels.openai,
            models_gemini: current_channels.gemini,
            variant_config: current_variant,
        };
        self.storage
            .set_config(&backup_key(&sanitized), serde_json::to_value(&backup)?)
            .await?;

        let updates: Vec<(&str, JsonValue)> = vec![
            (KEY_REGISTRY_OPENAI, serde_json::to_value(&plan.models.openai)?),
            (KEY_REGISTRY_GEMINI, serde_json::to_value(&plan.models.gemini)?),
            (KEY_VARIANT_CONFIG, serde_json::to_value(&plan.variant_config)?),
        ];
        self.apply_updates(updates).await?;

        debug!(plan = %sanitized, "applied assembly plan");
        Ok(diff)
    }

    /// `RollbackPlan(name)` (spec §4.3): atomically restores the backup
    /// captured by the most recent `ApplyPlan` for this name.
    pub async fn rollback_plan(&self, name: &str) -> AssemblyResult<Diff> {
        let sanitized = sanitize_plan_name(name);
        let lock = self.lock_for(&sanitized).await;
        let _guard = lock.lock().await;

        let backup = self.get_backup(&sanitized).await?;
        let target = ModelChannels {
            openai: backup.models_openai.clone(),
            gemini: backup.models_gemini.clone(),
        };
        let current = self.current_channels().await?;
        let current_variant = self.read_variant_config().await?;
        let diff = diff_channels(&current, &target, &current_variant, &backup.variant_config);

        let updates: Vec<(&str, JsonValue)> = vec![
            (KEY_REGISTRY_OPENAI, serde_json::to_value(&backup.models_openai)?),
            (KEY_REGISTRY_GEMINI, serde_json::to_value(&backup.models_gemini)?),
            (KEY_VARIANT_CONFIG, serde_json::to_value(&backup.variant_config)?),
        ];
        self.apply_updates(updates).await?;

        debug!(plan = %sanitized, "rolled back assembly plan");
        Ok(diff)
    }

    /// Applies `updates` via the best capability the backend advertises:
    /// a config transaction, then an idempotent batch applier, then
    /// one-at-a-time with best-effort reverse-order restore on failure.
    async fn apply_updates(&self, updates: Vec<(&str, JsonValue)>) -> AssemblyResult<()> {
        if let Ok(txn) = self.storage.begin_transaction().await {
            let mut failed = false;
            for (key, value) in &updates {
                if txn.set_config(key, value.clone()).await.is_err() {
                    failed = true;
                    break;
                }
            }
            if failed {
                let _ = txn.rollback().await;
                return Err(AssemblyError::TransactionFailed(
                    "one or more config writes failed inside the transaction".to_string(),
                ));
            }
            txn.commit().await?;
            return Ok(());
        }

        if let Some(applier) = self.storage.config_batch_applier() {
            let entries: HashMap<String, JsonValue> = updates
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            applier.apply_batch(entries).await?;
            return Ok(());
        }

        let mut applied: Vec<(&str, Option<JsonValue>)> = Vec::with_capacity(updates.len());
        for (key, value) in &updates {
            let prior = self.storage.get_config(key).await?;
            if let Err(err) = self.storage.set_config(key, value.clone()).await {
                warn!(key, error = %err, "one-at-a-time apply failed, restoring prior values");
                for (restore_key, restore_value) in applied.into_iter().rev() {
                    let result = match restore_value {
                        Some(v) => self.storage.set_config(restore_key, v).await,
                        None => self.storage.delete_config(restore_key).await,
                    };
                    if let Err(restore_err) = result {
                        warn!(key = restore_key, error = %restore_err, "best-effort restore failed");
                    }
                }
                return Err(err.into());
            }
            applied.push((key, prior));
        }
        Ok(())
    }

    /// `SaveRoutingState(ctx)` (spec §4.3, §6.3): persists the cooldown
    /// snapshot under `routing_state`.
    pub async fn save_routing_state(&self) -> AssemblyResult<()> {
        let Some(router) = &self.router else {
            return Ok(());
        };
        let (_, cooldowns) = router.snapshot().await;
        let state = RoutingState {
            cooldowns: cooldowns
                .into_iter()
                .map(|c| RoutingStateCooldown {
                    credential_id: c.credential_id.as_str().to_string(),
                    strikes: c.strikes,
                    remaining_sec: c.remaining_secs,
                })
                .collect(),
            saved_at: gw_common::time_util::now_unix(),
        };
        self.storage
            .set_config(KEY_ROUTING_STATE, serde_json::to_value(&state)?)
            .await?;
        Ok(())
    }

    /// `RestoreRoutingState(ctx)` (spec §4.3, §6.3): reapplies the
    /// persisted cooldown snapshot via `SetCooldown`.
    pub async fn restore_routing_state(&self) -> AssemblyResult<()> {
        let Some(router) = &self.router else {
            return Ok(());
        };
        let Some(value) = self.storage.get_config(KEY_ROUTING_STATE).await? else {
            return Ok(());
        };
        let state: RoutingState = serde_json::from_value(value)?;
        for entry in state.cooldowns {
            router
                .set_cooldown(
                    CredentialId::new(entry.credential_id),
                    entry.strikes,
                    entry.remaining_sec,
                )
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_config::RoutingConfig;
    use gw_credential::{
        Credential, CredentialError, CredentialStore, CredentialType, OAuthRefresher,
        RefreshOutcome,
    };
    use gw_storage::FileStorage;

    struct NoopRefresher;
    #[async_trait::async_trait]
    impl OAuthRefresher for NoopRefresher {
        async fn refresh(&self, _: &Credential, now: i64) -> Result<RefreshOutcome, CredentialError> {
            Ok(RefreshOutcome {
                access_token: "r".to_string(),
                expires_at: now + 3600,
            })
        }
    }

    fn entry(id: &str) -> RegistryEntry {
        RegistryEntry {
            id: id.to_string(),
            base: id.to_string(),
            enabled: true,
            fake_streaming: false,
            anti_trunc: false,
            thinking: false,
            search: false,
            provider: "gemini".to_string(),
        }
    }

    async fn service_with_storage() -> (AssemblyService, Arc<FileStorage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());
        let service = AssemblyService::new(storage.clone(), None);
        (service, storage, dir)
    }

    #[tokio::test]
    async fn snapshot_is_empty_without_prior_state() {
        let (service, _storage, _dir) = service_with_storage().await;
        let snap = service.snapshot().await.unwrap();
        assert!(snap.models.openai.is_empty());
        assert_eq!(snap.variant_config, VariantConfig::default());
    }

    #[tokio::test]
    async fn save_plan_sanitizes_name_and_round_trips() {
        let (service, storage, _dir) = service_with_storage().await;
        storage
            .set_config(
                KEY_REGISTRY_OPENAI,
                serde_json::to_value(vec![entry("gpt-4o")]).unwrap(),
            )
            .await
            .unwrap();
        let name = service.save_plan("my plan!", PlanInclude::default()).await.unwrap();
        assert_eq!(name, "myplan");
        let plan = service.get_plan("my plan!").await.unwrap();
        assert_eq!(plan.models.openai.len(), 1);
    }

    #[tokio::test]
    async fn apply_then_rollback_restores_original_state() {
        let (service, storage, _dir) = service_with_storage().await;
        storage
            .set_config(
                KEY_REGISTRY_OPENAI,
                serde_json::to_value(vec![entry("gpt-4o"), entry("gpt-4o-mini")]).unwrap(),
            )
            .await
            .unwrap();
        storage
            .set_config(
                KEY_REGISTRY_GEMINI,
                serde_json::to_value(vec![entry("gemini-2.5-pro")]).unwrap(),
            )
            .await
            .unwrap();
        service.save_plan("p", PlanInclude::default()).await.unwrap();

        storage
            .set_config(
                KEY_REGISTRY_OPENAI,
                serde_json::to_value(vec![entry("drift")]).unwrap(),
            )
            .await
            .unwrap();

        let diff = service.apply_plan("p").await.unwrap();
        assert_eq!(diff.openai.remove, vec!["drift".to_string()]);
        let after_apply = service.current_channels().await.unwrap();
        assert_eq!(after_apply.openai.len(), 2);

        let diff_apply_again = service.diff_apply("p").await.unwrap();
        assert!(diff_apply_again.openai.add.is_empty() && diff_apply_again.openai.remove.is_empty());

        service
            .storage
            .set_config(
                KEY_REGISTRY_OPENAI,
                serde_json::to_value(vec![entry("drift2")]).unwrap(),
            )
            .await
            .unwrap();
        service.apply_plan("p").await.unwrap();
        let rollback_diff = service.rollback_plan("p").await.unwrap();
        let after_rollback = service.current_channels().await.unwrap();
        assert_eq!(after_rollback.openai.len(), 2);
        let _ = rollback_diff;
    }

    #[tokio::test]
    async fn delete_plan_removes_it() {
        let (service, _storage, _dir) = service_with_storage().await;
        service.save_plan("gone", PlanInclude::default()).await.unwrap();
        service.delete_plan("gone").await.unwrap();
        let result = service.get_plan("gone").await;
        assert!(matches!(result, Err(AssemblyError::PlanNotFound(_))));
    }

    #[tokio::test]
    async fn routing_state_round_trips_through_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStorage::open(dir.path()).await.unwrap());
        let cred_store = Arc::new(CredentialStore::new(
            storage.clone(),
            Arc::new(NoopRefresher),
            0,
            HashMap::new(),
        ));
        let mut cred = Credential::new(CredentialId::new("c1"), CredentialType::ApiKey, 0);
        cred.api_key = Some("k".to_string());
        cred_store.upsert(cred).await.unwrap();
        let router = Arc::new(RoutingStrategy::new(cred_store, RoutingConfig::default()));
        router.set_cooldown(CredentialId::new("c1"), 2, 30).await;

        let service = AssemblyService::new(storage.clone(), Some(router.clone()));
        service.save_routing_state().await.unwrap();

        let router2 = Arc::new(RoutingStrategy::new(
            Arc::new(CredentialStore::new(
                storage.clone(),
                Arc::new(NoopRefresher),
                0,
                HashMap::new(),
            )),
            RoutingConfig::default(),
        ));
        let service2 = AssemblyService::new(storage, Some(router2.clone()));
        service2.restore_routing_state().await.unwrap();
        let (_, cooldowns) = router2.snapshot().await;
        assert_eq!(cooldowns.len(), 1);
        assert_eq!(cooldowns[0].strikes, 2);
    }
}
