use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::domains::Config;

/// Loads `Config` from a YAML or JSON file, then overlays environment
/// variables on top (env always wins — spec §6.4).
///
/// File format is chosen by extension: `.json` parses as JSON, anything
/// else (`.yaml`, `.yml`, or no extension) parses as YAML.
pub fn load(path: &Path) -> Result<Config> {
    let mut cfg = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        parse(&raw, path)?
    } else {
        Config::default()
    };

    apply_env_overlay(&mut cfg, &std::env::vars().collect());
    normalize(&mut cfg);
    Ok(cfg)
}

/// Parses `Config` from an in-memory buffer without touching the env or
/// filesystem, for tests and for the hot-reload watcher.
pub fn parse_str(raw: &str, path: &Path) -> Result<Config> {
    let mut cfg = parse(raw, path)?;
    apply_env_overlay(&mut cfg, &std::env::vars().collect());
    normalize(&mut cfg);
    Ok(cfg)
}

fn parse(raw: &str, path: &Path) -> Result<Config> {
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(raw).with_context(|| format!("parsing {} as JSON", path.display()))
    } else {
        serde_yaml::from_str(raw).with_context(|| format!("parsing {} as YAML", path.display()))
    }
}

/// Normalizes the server base path (spec §6.4): ensure a single leading
/// `/`, collapse repeated `/`, strip a trailing `/`, and collapse the
/// degenerate `"/"` down to the empty string.
pub fn normalize_base_path(raw: &str) -> String {
    let mut collapsed = String::with_capacity(raw.len());
    let mut last_was_slash = false;
    for c in raw.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        collapsed.push(c);
    }

    let mut normalized = if collapsed.starts_with('/') {
        collapsed
    } else {
        format!("/{collapsed}")
    };
    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    if normalized == "/" {
        normalized.clear();
    }
    normalized
}

fn normalize(cfg: &mut Config) {
    cfg.server.base_path = normalize_base_path(&cfg.server.base_path);

    let profile = std::env::var("GATEWAY_RUN_PROFILE").unwrap_or_default();
    if matches!(profile.to_ascii_lowercase().as_str(), "prod" | "production") {
        cfg.server.pprof_enabled = false;
        if cfg.security.allow_remote {
            cfg.security.allow_remote = cfg.security.read_only;
        }
    }
}

/// Overlays `UPPER_SNAKE`-cased environment variables onto domain fields.
///
/// Booleans accept `{1,true,yes,on}` / `{0,false,no,off}` case-insensitively;
/// lists are comma-separated with whitespace trimmed and empty entries
/// dropped. Unrecognized variables are ignored rather than rejected, since
/// the env and the file are independently optional.
pub fn apply_env_overlay(cfg: &mut Config, env: &HashMap<String, String>) {
    macro_rules! str_field {
        ($key:expr, $target:expr) => {
            if let Some(v) = env.get($key) {
                $target = v.clone();
            }
        };
    }
    macro_rules! opt_str_field {
        ($key:expr, $target:expr) => {
            if let Some(v) = env.get($key) {
                $target = if v.is_empty() { None } else { Some(v.clone()) };
            }
        };
    }
    macro_rules! num_field {
        ($key:expr, $target:expr) => {
            if let Some(v) = env.get($key) {
                if let Ok(parsed) = v.parse() {
                    $target = parsed;
                }
            }
        };
    }
    macro_rules! bool_field {
        ($key:expr, $target:expr) => {
            if let Some(v) = env.get($key) {
                if let Some(parsed) = parse_bool(v) {
                    $target = parsed;
                }
            }
        };
    }
    macro_rules! list_field {
        ($key:expr, $target:expr) => {
            if let Some(v) = env.get($key) {
                $target = parse_list(v);
            }
        };
    }

    str_field!("GATEWAY_SERVER_HOST", cfg.server.host);
    num_field!("GATEWAY_SERVER_PORT", cfg.server.port);
    str_field!("GATEWAY_SERVER_BASE_PATH", cfg.server.base_path);
    bool_field!("GATEWAY_SERVER_ADMIN_ENABLED", cfg.server.admin_enabled);
    bool_field!("GATEWAY_SERVER_PPROF_ENABLED", cfg.server.pprof_enabled);

    str_field!("GATEWAY_UPSTREAM_ENDPOINT_URL", cfg.upstream.endpoint_url);
    list_field!("GATEWAY_UPSTREAM_API_KEYS", cfg.upstream.api_keys);

    opt_str_field!("GATEWAY_SECURITY_MANAGEMENT_KEY", cfg.security.management_key);
    bool_field!("GATEWAY_SECURITY_READ_ONLY", cfg.security.read_only);
    bool_field!("GATEWAY_SECURITY_ALLOW_REMOTE", cfg.security.allow_remote);
    list_field!("GATEWAY_SECURITY_IP_ALLOWLIST", cfg.security.ip_allowlist);
    str_field!("GATEWAY_SECURITY_AUTH_DIR", cfg.security.auth_dir);

    num_field!(
        "GATEWAY_EXECUTION_CALLS_PER_ROTATION",
        cfg.execution.calls_per_rotation
    );
    num_field!(
        "GATEWAY_EXECUTION_MAX_CONCURRENT_PER_CREDENTIAL",
        cfg.execution.max_concurrent_per_credential
    );
    bool_field!(
        "GATEWAY_EXECUTION_USE_ENV_CREDENTIALS",
        cfg.execution.use_env_credentials
    );

    str_field!("GATEWAY_STORAGE_BACKEND", cfg.storage.backend);
    str_field!("GATEWAY_STORAGE_DATA_DIR", cfg.storage.data_dir);

    bool_field!("GATEWAY_RETRY_ENABLED", cfg.retry.enabled);
    num_field!("GATEWAY_RETRY_MAX_RETRIES", cfg.retry.max_retries);
    num_field!(
        "GATEWAY_RETRY_INITIAL_INTERVAL_MS",
        cfg.retry.initial_interval_ms
    );
    num_field!("GATEWAY_RETRY_MAX_INTERVAL_MS", cfg.retry.max_interval_ms);

    bool_field!("GATEWAY_RATE_LIMIT_ENABLED", cfg.rate_limit.enabled);
    num_field!("GATEWAY_RATE_LIMIT_RPS", cfg.rate_limit.rps);
    num_field!("GATEWAY_RATE_LIMIT_BURST", cfg.rate_limit.burst);

    num_field!(
        "GATEWAY_ROUTING_STICKY_TTL_SECS",
        cfg.routing.sticky_ttl_secs
    );
    num_field!(
        "GATEWAY_ROUTING_COOLDOWN_BASE_MS",
        cfg.routing.cooldown_base_ms
    );
    num_field!(
        "GATEWAY_ROUTING_COOLDOWN_MAX_MS",
        cfg.routing.cooldown_max_ms
    );
    bool_field!("GATEWAY_ROUTING_PERSIST", cfg.routing.persist);

    bool_field!(
        "GATEWAY_RESPONSE_SHAPING_ANTI_TRUNCATION_ENABLED",
        cfg.response_shaping.anti_truncation_enabled
    );
    bool_field!(
        "GATEWAY_RESPONSE_SHAPING_FAKE_STREAMING_ENABLED",
        cfg.response_shaping.fake_streaming_enabled
    );
    opt_str_field!(
        "GATEWAY_RESPONSE_SHAPING_PROXY_URL",
        cfg.response_shaping.proxy_url
    );

    bool_field!("GATEWAY_AUTO_BAN_ENABLED", cfg.auto_ban.enabled);
    bool_field!("GATEWAY_AUTO_PROBE_ENABLED", cfg.auto_probe.enabled);
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_base_path_variants() {
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path("api"), "/api");
        assert_eq!(normalize_base_path("//api//v1//"), "/api/v1");
        assert_eq!(normalize_base_path("/api/"), "/api");
    }

    #[test]
    fn env_overlay_parses_booleans_and_lists() {
        let mut cfg = Config::default();
        let mut env = HashMap::new();
        env.insert("GATEWAY_RETRY_ENABLED".to_string(), "Off".to_string());
        env.insert(
            "GATEWAY_SECURITY_IP_ALLOWLIST".to_string(),
            " 10.0.0.1 ,, 10.0.0.2".to_string(),
        );
        apply_env_overlay(&mut cfg, &env);
        assert!(!cfg.retry.enabled);
        assert_eq!(cfg.security.ip_allowlist, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn unrecognized_env_var_is_ignored() {
        let mut cfg = Config::default();
        let mut env = HashMap::new();
        env.insert("SOME_UNRELATED_VAR".to_string(), "x".to_string());
        let before = cfg.clone();
        apply_env_overlay(&mut cfg, &env);
        assert_eq!(cfg, before);
    }
}
