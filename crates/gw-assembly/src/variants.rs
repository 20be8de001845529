use crate::model::{RegistryEntry, VariantConfig};

/// Derives every variant `RegistryEntry` for `base` (spec §3.4 "Derived ID
/// is the deterministic concatenation of base + variant suffixes when not
/// explicitly set", §3.5 "Used to derive variant IDs from a base model").
///
/// One entry per recognized modifier plus their ID-level combination with
/// custom prefixes/suffixes: fake-streaming and anti-truncation are
/// ID-prefixes, search and thinking are ID-suffixes, and a plain passthrough
/// entry (no modifiers) is always included first. Custom prefixes/suffixes
/// behave the same way as the built-in ones but carry no flag of their own
/// (spec §9 open question: resolved as plain ID aliases for providers that
/// expect a renamed passthrough model).
pub fn generate_variants(base: &RegistryEntry, config: &VariantConfig) -> Vec<RegistryEntry> {
    let mut variants = Vec::new();
    variants.push(base.clone());

    if !config.fake_streaming_prefix.is_empty() {
        variants.push(RegistryEntry {
            id: format!("{}{}", config.fake_streaming_prefix, base.base),
            fake_streaming: true,
            ..base.clone()
        });
    }
    if !config.anti_truncation_prefix.is_empty() {
        variants.push(RegistryEntry {
            id: format!("{}{}", config.anti_truncation_prefix, base.base),
            anti_trunc: true,
            ..base.clone()
        });
    }
    if !config.search_suffix.is_empty() {
        variants.push(RegistryEntry {
            id: format!("{}{}", base.base, config.search_suffix),
            search: true,
            ..base.clone()
        });
    }
    for suffix in &config.thinking_suffixes {
        if suffix.is_empty() {
            continue;
        }
        variants.push(RegistryEntry {
            id: format!("{}{}", base.base, suffix),
            thinking: true,
            ..base.clone()
        });
    }
    for prefix in &config.custom_prefixes {
        if prefix.is_empty() {
            continue;
        }
        variants.push(RegistryEntry {
            id: format!("{}{}", prefix, base.base),
            ..base.clone()
        });
    }
    for suffix in &config.custom_suffixes {
        if suffix.is_empty() {
            continue;
        }
        variants.push(RegistryEntry {
            id: format!("{}{}", base.base, suffix),
            ..base.clone()
        });
    }

    dedupe_by_id(variants)
}

/// Generates variants for every entry in `bases`, flattening the result
/// (spec §6.2 `GET /models/generate-variants`, applied across a whole
/// registry channel rather than a single base model).
pub fn generate_variants_for_channel(bases: &[RegistryEntry], config: &VariantConfig) -> Vec<RegistryEntry> {
    dedupe_by_id(
        bases
            .iter()
            .flat_map(|base| generate_variants(base, config))
            .collect(),
    )
}

fn dedupe_by_id(entries: Vec<RegistryEntry>) -> Vec<RegistryEntry> {
    let mut seen = std::collections::HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert(e.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(id: &str) -> RegistryEntry {
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
    fn default_config_produces_passthrough_plus_four_modifiers() {
        let variants = generate_variants(&base("gemini-2.5-pro"), &VariantConfig::default());
        let ids: Vec<&str> = variants.iter().map(|v| v.id.as_str()).collect();
        assert!(ids.contains(&"gemini-2.5-pro"));
        assert!(ids.contains(&"假流式/gemini-2.5-pro"));
        assert!(ids.contains(&"流式抗截断/gemini-2.5-pro"));
        assert!(ids.contains(&"gemini-2.5-pro-search"));
        assert!(ids.contains(&"gemini-2.5-pro-thinking"));
        assert_eq!(variants.len(), 5);
    }

    #[test]
    fn flags_are_set_on_their_own_variant_only() {
        let variants = generate_variants(&base("m"), &VariantConfig::default());
        let search = variants.iter().find(|v| v.id == "m-search").unwrap();
        assert!(search.search);
        assert!(!search.fake_streaming);
        let passthrough = variants.iter().find(|v| v.id == "m").unwrap();
        assert!(!passthrough.fake_streaming && !passthrough.search && !passthrough.thinking);
    }

    #[test]
    fn empty_prefixes_and_suffixes_are_skipped() {
        let config = VariantConfig {
            fake_streaming_prefix: String::new(),
            anti_truncation_prefix: String::new(),
            search_suffix: String::new(),
            thinking_suffixes: vec![],
            custom_prefixes: vec![],
            custom_suffixes: vec![],
        };
        let variants = generate_variants(&base("m"), &config);
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].id, "m");
    }

    #[test]
    fn custom_prefixes_and_suffixes_are_included() {
        let config = VariantConfig {
            custom_prefixes: vec!["alt/".to_string()],
            custom_suffixes: vec!["-v2".to_string()],
            ..VariantConfig::default()
        };
        let variants = generate_variants(&base("m"), &config);
        let ids: Vec<&str> = variants.iter().map(|v| v.id.as_str()).collect();
        assert!(ids.contains(&"alt/m"));
        assert!(ids.contains(&"m-v2"));
    }

    #[test]
    fn duplicate_ids_across_bases_are_deduped() {
        let bases = vec![base("m"), base("m")];
        let variants = generate_variants_for_channel(&bases, &VariantConfig::default());
        assert_eq!(variants.iter().filter(|v| v.id == "m").count(), 1);
    }
}
