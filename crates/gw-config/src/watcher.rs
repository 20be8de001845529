use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use sha2::Digest;
use tokio::sync::broadcast;

use crate::domains::Config;
use crate::loader;

/// Debounce window before a detected filesystem event triggers a reload
/// (spec §6.4).
const DEBOUNCE: Duration = Duration::from_millis(100);
/// Fallback poll interval used when the native `notify` backend cannot be
/// started (e.g. inotify watch limits exhausted).
const POLL_FALLBACK: Duration = Duration::from_secs(5);

/// Watches the config file backing an `ArcSwap<Config>` and hot-swaps a
/// freshly parsed `Config` in whenever the file's content hash changes.
///
/// Holds the live `notify` watcher for its lifetime; dropping it stops
/// watching.
pub struct ConfigWatcher {
    _watcher: Option<RecommendedWatcher>,
}

impl ConfigWatcher {
    /// Starts watching `path`, swapping reloaded configs into `slot` and
    /// publishing a `()` on `changes` after every successful reload.
    pub fn start(path: PathBuf, slot: Arc<ArcSwap<Config>>, changes: broadcast::Sender<()>) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<()>(16);

        let watch_path = path.clone();
        let watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                if event.kind.is_modify() || event.kind.is_create() {
                    let _ = tx.blocking_send(());
                }
            }
        })
        .and_then(|mut w| {
            w.watch(&watch_path, RecursiveMode::NonRecursive)?;
            Ok(w)
        });

        let watcher = match watcher {
            Ok(w) => {
                tracing::info!(path = %path.display(), "watching config file for changes");
                spawn_debounce_loop(path, slot, changes, rx);
                Some(w)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "falling back to polling config watcher");
                spawn_poll_loop(path, slot, changes);
                None
            }
        };

        Self { _watcher: watcher }
    }
}

fn spawn_debounce_loop(
    path: PathBuf,
    slot: Arc<ArcSwap<Config>>,
    changes: broadcast::Sender<()>,
    mut rx: tokio::sync::mpsc::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut last_hash: Option<[u8; 32]> = None;
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                received = rx.recv() => {
                    if received.is_none() {
                        return;
                    }
                    deadline = Some(tokio::time::Instant::now() + DEBOUNCE);
                }
                _ = async {
                    match deadline {
                        Some(d) => tokio::time::sleep_until(d).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    deadline = None;
                    reload_if_changed(&path, &slot, &changes, &mut last_hash);
                }
            }
        }
    });
}

fn spawn_poll_loop(path: PathBuf, slot: Arc<ArcSwap<Config>>, changes: broadcast::Sender<()>) {
    tokio::spawn(async move {
        let mut last_hash: Option<[u8; 32]> = None;
        loop {
            tokio::time::sleep(POLL_FALLBACK).await;
            reload_if_changed(&path, &slot, &changes, &mut last_hash);
        }
    });
}

fn reload_if_changed(
    path: &PathBuf,
    slot: &Arc<ArcSwap<Config>>,
    changes: &broadcast::Sender<()>,
    last_hash: &mut Option<[u8; 32]>,
) {
    let contents = match std::fs::read(path) {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(path = %path.display(), %err, "config file read failed");
            return;
        }
    };

    let hash: [u8; 32] = sha2::Sha256::digest(&contents).into();
    if last_hash.as_ref() == Some(&hash) {
        return;
    }
    *last_hash = Some(hash);

    match loader::parse_str(&String::from_utf8_lossy(&contents), path) {
        Ok(new_cfg) => {
            tracing::info!(path = %path.display(), "config reloaded");
            slot.store(Arc::new(new_cfg));
            let _ = changes.send(());
        }
        Err(err) => {
            tracing::error!(path = %path.display(), %err, "config reload failed, keeping previous config");
        }
    }
}
