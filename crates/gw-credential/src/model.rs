use std::collections::HashMap;

use gw_common::CredentialId;
use serde::{Deserialize, Serialize};

/// Variant tag (spec §3.1 `Type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Oauth,
    ApiKey,
    ServiceAccount,
}

/// A single pooled credential: identity, secret material, lifecycle, and
/// embedded health state (spec §3.1). Only the secret fields valid for
/// `kind` are expected to be populated; the others round-trip as `None`
/// rather than being modeled as separate structs per variant, since a
/// single record is what the store and router pass around uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub kind: CredentialType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,

    #[serde(default)]
    pub health: CredentialHealth,
}

impl Credential {
    pub fn new(id: CredentialId, kind: CredentialType, now: i64) -> Self {
        Self {
            id,
            kind,
            access_token: None,
            refresh_token: None,
            api_key: None,
            client_id: None,
            client_secret: None,
            token_uri: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
            health: CredentialHealth::default(),
        }
    }

    /// Seconds until `expires_at`; `None` if the credential has no expiry.
    pub fn seconds_until_expiry(&self, now: i64) -> Option<i64> {
        self.expires_at.map(|exp| exp - now)
    }

    pub fn is_eligible(&self) -> bool {
        !self.health.disabled && !self.health.auto_banned
    }
}

/// Health/usage state (spec §3.1 "Health state (embedded or sibling)"),
/// split into a sibling struct so the router can share `Arc<RwLock<_>>`
/// access over health without cloning secret material on every score
/// recomputation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialHealth {
    pub disabled: bool,
    pub auto_banned: bool,
    pub failure_count: u64,
    pub success_count: u64,
    pub consecutive_fails: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub health_score: f64,
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
    #[serde(default)]
    pub error_code_counts: HashMap<u16, u64>,
    pub daily_usage: u64,
    pub daily_limit: u64,
    #[serde(default)]
    pub usage_stats: HashMap<String, i64>,
}

impl Default for CredentialHealth {
    fn default() -> Self {
        Self {
            disabled: false,
            auto_banned: false,
            failure_count: 0,
            success_count: 0,
            consecutive_fails: 0,
            last_success: None,
            last_failure: None,
            failure_reason: None,
            health_score: 1.0,
            error_rate: 0.0,
            avg_response_time_ms: 0.0,
            error_code_counts: HashMap::new(),
            daily_usage: 0,
            daily_limit: 0,
            usage_stats: HashMap::new(),
        }
    }
}

impl CredentialHealth {
    /// Quota penalty term of the router's score function (spec §4.1).
    pub fn quota_penalty(&self) -> f64 {
        if self.daily_limit == 0 {
            return 1.0;
        }
        let ratio = self.daily_usage as f64 / self.daily_limit as f64;
        if ratio <= 0.75 {
            1.0
        } else if ratio <= 0.9 {
            0.6
        } else {
            0.2
        }
    }

    pub fn score(&self) -> f64 {
        self.health_score * self.quota_penalty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_penalty_steps_match_spec_thresholds() {
        let mut health = CredentialHealth {
            daily_limit: 100,
            ..Default::default()
        };
        health.daily_usage = 70;
        assert_eq!(health.quota_penalty(), 1.0);
        health.daily_usage = 80;
        assert_eq!(health.quota_penalty(), 0.6);
        health.daily_usage = 95;
        assert_eq!(health.quota_penalty(), 0.2);
    }

    #[test]
    fn zero_daily_limit_means_unbounded() {
        let health = CredentialHealth {
            daily_limit: 0,
            daily_usage: 999,
            ..Default::default()
        };
        assert_eq!(health.quota_penalty(), 1.0);
    }

    #[test]
    fn health_invariants_stay_in_bounds() {
        let health = CredentialHealth::default();
        assert!((0.0..=1.0).contains(&health.health_score));
        assert!((0.0..=1.0).contains(&health.error_rate));
    }
}
