use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The full merged configuration (spec §3.7), grouped into domains.
///
/// Every field has a typed default (§3.7 invariant); there is deliberately
/// no top-level mirror of domain fields (§9 "Back-compat twin fields" — the
/// mirror is dropped, domain-scoped access only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub security: SecurityConfig,
    pub execution: ExecutionConfig,
    pub storage: StorageConfig,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub routing: RoutingConfig,
    pub response_shaping: ResponseShapingConfig,
    pub auto_ban: AutoBanConfig,
    pub auto_probe: AutoProbeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            security: SecurityConfig::default(),
            execution: ExecutionConfig::default(),
            storage: StorageConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            routing: RoutingConfig::default(),
            response_shaping: ResponseShapingConfig::default(),
            auto_ban: AutoBanConfig::default(),
            auto_probe: AutoProbeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Normalized per §6.4: leading `/` added, duplicate `/` collapsed,
    /// trailing `/` removed, `"/"` collapses to empty.
    pub base_path: String,
    pub admin_enabled: bool,
    pub pprof_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            base_path: String::new(),
            admin_enabled: true,
            pprof_enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub endpoint_url: String,
    pub api_keys: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "https://cloudcode-pa.googleapis.com".to_string(),
            api_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub management_key: Option<String>,
    pub management_key_hash: Option<String>,
    pub read_only: bool,
    pub allow_remote: bool,
    pub ip_allowlist: Vec<String>,
    pub auth_dir: String,
    /// TTL (seconds) after process start during which remote management is
    /// allowed at all, even if `allow_remote` is set; `None` = unbounded.
    pub remote_ttl_secs: Option<u64>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            management_key: None,
            management_key_hash: None,
            read_only: false,
            allow_remote: false,
            ip_allowlist: Vec::new(),
            auth_dir: "./auth".to_string(),
            remote_ttl_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub calls_per_rotation: u32,
    pub max_concurrent_per_credential: u32,
    pub use_env_credentials: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            calls_per_rotation: 1,
            max_concurrent_per_credential: 0,
            use_env_credentials: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: String,
    pub data_dir: String,
    pub connection_params: HashMap<String, String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            data_dir: "./data".to_string(),
            connection_params: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_factor: f64,
    pub on_5xx: bool,
    pub on_network_error: bool,
    pub connect_timeout_ms: u64,
    pub tls_handshake_timeout_ms: u64,
    pub response_header_timeout_ms: u64,
    pub expect_continue_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_interval_ms: 500,
            max_interval_ms: 30_000,
            backoff_factor: 2.0,
            on_5xx: true,
            on_network_error: true,
            connect_timeout_ms: 10_000,
            tls_handshake_timeout_ms: 10_000,
            response_header_timeout_ms: 30_000,
            expect_continue_timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub rps: u32,
    pub burst: u32,
    pub usage_reset_hour: u8,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rps: 5,
            burst: 10,
            usage_reset_hour: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub sticky_ttl_secs: u64,
    pub cooldown_base_ms: u64,
    pub cooldown_max_ms: u64,
    pub persist: bool,
    pub pick_log_capacity: usize,
    pub refresh_ahead_secs: i64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            sticky_ttl_secs: 300,
            cooldown_base_ms: 2_000,
            cooldown_max_ms: 60_000,
            persist: true,
            pick_log_capacity: 256,
            refresh_ahead_secs: 180,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseShapingConfig {
    pub anti_truncation_enabled: bool,
    pub anti_truncation_max_attempts: u32,
    pub anti_truncation_retry_delay_ms: u64,
    pub anti_truncation_min_completion_len: usize,
    pub fake_streaming_enabled: bool,
    pub fake_streaming_chunk_size: usize,
    pub fake_streaming_chunk_delay_ms: u64,
    pub image_placeholder: String,
    pub sanitizer_enabled: bool,
    pub proxy_url: Option<String>,
}

impl Default for ResponseShapingConfig {
    fn default() -> Self {
        Self {
            anti_truncation_enabled: true,
            anti_truncation_max_attempts: 5,
            anti_truncation_retry_delay_ms: 500,
            anti_truncation_min_completion_len: 50,
            fake_streaming_enabled: false,
            fake_streaming_chunk_size: 5,
            fake_streaming_chunk_delay_ms: 30,
            image_placeholder: "[image omitted]".to_string(),
            sanitizer_enabled: true,
            proxy_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoBanConfig {
    pub enabled: bool,
    /// Consecutive-failure thresholds per HTTP status code at which a
    /// credential is auto-banned (spec §4.6 `AutoBan429Threshold` etc).
    pub status_thresholds: HashMap<u16, u32>,
}

impl Default for AutoBanConfig {
    fn default() -> Self {
        let mut status_thresholds = HashMap::new();
        status_thresholds.insert(429, 10);
        status_thresholds.insert(403, 5);
        Self {
            enabled: true,
            status_thresholds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoProbeConfig {
    pub enabled: bool,
    pub hour: u8,
    pub model: String,
    pub timeout_secs: u64,
    pub threshold: f64,
}

impl Default for AutoProbeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hour: 4,
            model: "gemini-2.5-flash".to_string(),
            timeout_secs: 15,
            threshold: 0.5,
        }
    }
}
