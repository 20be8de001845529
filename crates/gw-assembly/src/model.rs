use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Registry entry (spec §3.4): a single exposed model on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: String,
    pub base: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub fake_streaming: bool,
    #[serde(default)]
    pub anti_trunc: bool,
    #[serde(default)]
    pub thinking: bool,
    #[serde(default)]
    pub search: bool,
    pub provider: String,
}

fn default_true() -> bool {
    true
}

/// Variant-derivation configuration (spec §3.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariantConfig {
    pub fake_streaming_prefix: String,
    pub anti_truncation_prefix: String,
    pub search_suffix: String,
    pub thinking_suffixes: Vec<String>,
    pub custom_prefixes: Vec<String>,
    pub custom_suffixes: Vec<String>,
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self {
            fake_streaming_prefix: "假流式/".to_string(),
            anti_truncation_prefix: "流式抗截断/".to_string(),
            search_suffix: "-search".to_string(),
            thinking_suffixes: vec!["-thinking".to_string()],
            custom_prefixes: Vec::new(),
            custom_suffixes: Vec::new(),
        }
    }
}

/// Both channels' registries (spec §3.4 "Two channels").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelChannels {
    #[serde(default)]
    pub openai: Vec<RegistryEntry>,
    #[serde(default)]
    pub gemini: Vec<RegistryEntry>,
}

/// Plan payload (spec §3.6): a named snapshot of both channels' registries
/// plus the variant config, persistable and re-appliable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub models: ModelChannels,
    pub variant_config: VariantConfig,
}

/// Backup captured on apply (spec §3.6, §6.3: "ts, models_openai,
/// models_gemini, variant_config").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanBackup {
    pub ts: i64,
    pub models_openai: Vec<RegistryEntry>,
    pub models_gemini: Vec<RegistryEntry>,
    pub variant_config: VariantConfig,
}

/// Include flags for `SavePlan` (spec §4.3 `include`).
#[derive(Debug, Clone, Copy)]
pub struct PlanInclude {
    pub models: bool,
    pub variants: bool,
}

impl Default for PlanInclude {
    fn default() -> Self {
        Self {
            models: true,
            variants: true,
        }
    }
}

/// Add/remove diff between two ID sets for one channel.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelDiff {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Diff {
    pub openai: ChannelDiff,
    pub gemini: ChannelDiff,
    pub variant_changed: bool,
}

fn ids_of(entries: &[RegistryEntry]) -> HashSet<&str> {
    entries.iter().map(|e| e.id.as_str()).collect()
}

/// `DiffPlan`/`DiffApply`/`DiffRollback` (spec §4.3): diff of exposed IDs
/// between `current` and `target` per channel, plus a variant-config
/// equality check.
pub fn diff_channels(current: &ModelChannels, target: &ModelChannels, current_variant: &VariantConfig, target_variant: &VariantConfig) -> Diff {
    Diff {
        openai: diff_ids(&current.openai, &target.openai),
        gemini: diff_ids(&current.gemini, &target.gemini),
        variant_changed: current_variant != target_variant,
    }
}

fn diff_ids(current: &[RegistryEntry], target: &[RegistryEntry]) -> ChannelDiff {
    let current_ids = ids_of(current);
    let target_ids = ids_of(target);
    let mut add: Vec<String> = target_ids
        .difference(&current_ids)
        .map(|s| s.to_string())
        .collect();
    let mut remove: Vec<String> = current_ids
        .difference(&target_ids)
        .map(|s| s.to_string())
        .collect();
    add.sort();
    remove.sort();
    ChannelDiff { add, remove }
}

/// Plan-name sanitization (spec §4.3 "Sanitization"): restricted to
/// `[A-Za-z0-9_-]`; empty sanitizes to `"default"`.
pub fn sanitize_plan_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if sanitized.is_empty() {
        "default".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn sanitize_strips_disallowed_characters() {
        assert_eq!(sanitize_plan_name("my plan!@#"), "myplan");
        assert_eq!(sanitize_plan_name("ok_name-1"), "ok_name-1");
        assert_eq!(sanitize_plan_name("!!!"), "default");
        assert_eq!(sanitize_plan_name(""), "default");
    }

    #[test]
    fn diff_reports_adds_and_removes() {
        let current = ModelChannels {
            openai: vec![entry("gpt-4o"), entry("gpt-4o-mini")],
            gemini: vec![entry("gemini-2.5-pro")],
        };
        let target = ModelChannels {
            openai: vec![entry("gpt-4o")],
            gemini: vec![entry("gemini-2.5-pro"), entry("gemini-2.5-flash")],
        };
        let variant = VariantConfig::default();
        let diff = diff_channels(&current, &target, &variant, &variant);
        assert_eq!(diff.openai.remove, vec!["gpt-4o-mini".to_string()]);
        assert!(diff.openai.add.is_empty());
        assert_eq!(diff.gemini.add, vec!["gemini-2.5-flash".to_string()]);
        assert!(!diff.variant_changed);
    }

    #[test]
    fn identical_channels_yield_empty_diff() {
        let channels = ModelChannels {
            openai: vec![entry("gpt-4o")],
            gemini: vec![],
        };
        let variant = VariantConfig::default();
        let diff = diff_channels(&channels, &channels, &variant, &variant);
        assert!(diff.openai.add.is_empty() && diff.openai.remove.is_empty());
    }
}
