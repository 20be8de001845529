use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

/// A single deterministic regex-replacement rule (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexRule {
    pub name: String,
    pub pattern: String,
    pub replacement: String,
    pub enabled: bool,
}

struct CompiledRule {
    name: String,
    pattern: String,
    replacement: String,
    regex: Regex,
}

/// Compiles enabled rules, skipping (and logging) any whose pattern fails
/// to compile (spec §4.5 "safety wrapper"). The `regex` crate is itself
/// linear-time, so no additional timeout wrapper is needed.
pub struct RegexEngine {
    compiled: Vec<CompiledRule>,
}

impl RegexEngine {
    pub fn compile(rules: &[RegexRule]) -> Self {
        let mut compiled = Vec::new();
        for rule in rules {
            if !rule.enabled {
                continue;
            }
            match Regex::new(&rule.pattern) {
                Ok(regex) => compiled.push(CompiledRule {
                    name: rule.name.clone(),
                    pattern: rule.pattern.clone(),
                    replacement: rule.replacement.clone(),
                    regex,
                }),
                Err(err) => {
                    warn!(rule = %rule.name, pattern = %rule.pattern, error = %err, "skipping rule with invalid pattern");
                }
            }
        }
        Self { compiled }
    }

    /// `ApplyToText(text)` (spec §4.5): applies enabled rules in order,
    /// counting matches per rule.
    pub fn apply_to_text(&self, text: &str) -> (String, HashMap<String, usize>) {
        let mut current = text.to_string();
        let mut counts = HashMap::new();
        for rule in &self.compiled {
            let match_count = rule.regex.find_iter(&current).count();
            if match_count > 0 {
                current = rule.regex.replace_all(&current, rule.replacement.as_str()).into_owned();
            }
            counts.insert(rule.name.clone(), match_count);
        }
        (current, counts)
    }

    /// `ApplyToPayload(payload)` (spec §4.5): walks
    /// `.request.contents[*].parts[*].text` and applies text replacement in
    /// place; other fields are untouched. Malformed JSON or a missing path
    /// short-circuits to a no-op, matching text unmodified.
    pub fn apply_to_payload(&self, payload: &str) -> (String, HashMap<String, usize>) {
        let Ok(mut value) = serde_json::from_str::<JsonValue>(payload) else {
            return (payload.to_string(), HashMap::new());
        };
        let mut total_counts: HashMap<String, usize> = HashMap::new();
        if let Some(contents) = value
            .get_mut("request")
            .and_then(|r| r.get_mut("contents"))
            .and_then(|c| c.as_array_mut())
        {
            for content in contents.iter_mut() {
                let Some(parts) = content.get_mut("parts").and_then(|p| p.as_array_mut()) else {
                    continue;
                };
                for part in parts.iter_mut() {
                    let Some(text_value) = part.get_mut("text") else {
                        continue;
                    };
                    if let Some(text) = text_value.as_str() {
                        let (replaced, counts) = self.apply_to_text(text);
                        for (name, count) in counts {
                            *total_counts.entry(name).or_insert(0) += count;
                        }
                        *text_value = JsonValue::String(replaced);
                    }
                }
            }
        }
        (
            serde_json::to_string(&value).unwrap_or_else(|_| payload.to_string()),
            total_counts,
        )
    }

    pub fn rule_count(&self) -> usize {
        self.compiled.len()
    }
}

/// One rule's contribution to a `DryRun` (spec §4.5).
#[derive(Debug, Clone, Serialize)]
pub struct DryRunRuleResult {
    pub index: usize,
    pub pattern: String,
    pub replacement: String,
    pub matches: usize,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DryRunSummary {
    pub total_rules: usize,
    pub rules_matched: usize,
    pub total_matches: usize,
    pub text_modified: bool,
    pub payload_modified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DryRunResult {
    pub original: String,
    pub processed: String,
    pub rules_applied: Vec<DryRunRuleResult>,
    pub summary: DryRunSummary,
}

/// `DryRun(request)` (spec §4.5): either `text` or `payload` input is
/// accepted; `payload` wins if both are given. Produces a structured
/// preview without persisting changes.
pub fn dry_run(rules: &[RegexRule], text: Option<&str>, payload: Option<&str>) -> DryRunResult {
    let total_rules = rules.len();
    let input = payload.or(text).unwrap_or_default();
    let is_payload = payload.is_some();

    let mut rules_applied = Vec::new();
    let mut total_matches = 0usize;
    let mut rules_matched = 0usize;

    let enabled_rules: Vec<&RegexRule> = rules.iter().filter(|r| r.enabled).collect();
    for (index, rule) in enabled_rules.iter().enumerate() {
        let Ok(regex) = Regex::new(&rule.pattern) else {
            continue;
        };
        let haystack = if is_payload {
            extract_texts_for_preview(input)
        } else {
            input.to_string()
        };
        let matches: Vec<String> = regex
            .find_iter(&haystack)
            .take(3)
            .map(|m| m.as_str().to_string())
            .collect();
        let count = regex.find_iter(&haystack).count();
        if count > 0 {
            rules_matched += 1;
        }
        total_matches += count;
        rules_applied.push(DryRunRuleResult {
            index,
            pattern: rule.pattern.clone(),
            replacement: rule.replacement.clone(),
            matches: count,
            examples: matches,
        });
    }

    let engine = RegexEngine::compile(rules);
    let (processed, text_modified, payload_modified) = if is_payload {
        let (processed, _) = engine.apply_to_payload(input);
        let modified = processed != input;
        (processed, false, modified)
    } else {
        let (processed, _) = engine.apply_to_text(input);
        let modified = processed != input;
        (processed, modified, false)
    };

    DryRunResult {
        original: input.to_string(),
        processed,
        rules_applied,
        summary: DryRunSummary {
            total_rules,
            rules_matched,
            total_matches,
            text_modified,
            payload_modified,
        },
    }
}

fn extract_texts_for_preview(payload: &str) -> String {
    let Ok(value) = serde_json::from_str::<JsonValue>(payload) else {
        return String::new();
    };
    let mut combined = String::new();
    if let Some(contents) = value
        .get("request")
        .and_then(|r| r.get("contents"))
        .and_then(|c| c.as_array())
    {
        for content in contents {
            if let Some(parts) = content.get("parts").and_then(|p| p.as_array()) {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                        combined.push_str(text);
                        combined.push('\n');
                    }
                }
            }
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_rules_are_skipped() {
        let rules = vec![RegexRule {
            name: "r1".to_string(),
            pattern: "foo".to_string(),
            replacement: "bar".to_string(),
            enabled: false,
        }];
        let engine = RegexEngine::compile(&rules);
        assert_eq!(engine.rule_count(), 0);
        let (text, counts) = engine.apply_to_text("foo baz");
        assert_eq!(text, "foo baz");
        assert!(counts.is_empty());
    }

    #[test]
    fn invalid_pattern_is_skipped_not_fatal() {
        let rules = vec![
            RegexRule {
                name: "bad".to_string(),
                pattern: "(".to_string(),
                replacement: "".to_string(),
                enabled: true,
            },
            RegexRule {
                name: "good".to_string(),
                pattern: "foo".to_string(),
                replacement: "bar".to_string(),
                enabled: true,
            },
        ];
        let engine = RegexEngine::compile(&rules);
        assert_eq!(engine.rule_count(), 1);
        let (text, _) = engine.apply_to_text("foo");
        assert_eq!(text, "bar");
    }

    #[test]
    fn apply_to_text_counts_matches_per_rule() {
        let rules = vec![RegexRule {
            name: "r1".to_string(),
            pattern: "a+".to_string(),
            replacement: "X".to_string(),
            enabled: true,
        }];
        let engine = RegexEngine::compile(&rules);
        let (text, counts) = engine.apply_to_text("aa b aaa b a");
        assert_eq!(text, "X b X b X");
        assert_eq!(counts["r1"], 3);
    }

    #[test]
    fn apply_to_payload_only_touches_text_fields() {
        let rules = vec![RegexRule {
            name: "r1".to_string(),
            pattern: "secret".to_string(),
            replacement: "***".to_string(),
            enabled: true,
        }];
        let engine = RegexEngine::compile(&rules);
        let payload = r#"{"request":{"contents":[{"role":"user","parts":[{"text":"my secret"}]}]},"other":"secret"}"#;
        let (result, counts) = engine.apply_to_payload(payload);
        assert_eq!(counts["r1"], 1);
        assert!(result.contains("my ***"));
        assert!(result.contains("\"other\":\"secret\""));
    }

    #[test]
    fn malformed_payload_is_noop() {
        let engine = RegexEngine::compile(&[]);
        let (result, counts) = engine.apply_to_payload("not json");
        assert_eq!(result, "not json");
        assert!(counts.is_empty());
    }

    #[test]
    fn dry_run_with_no_rules_is_untouched() {
        let result = dry_run(&[], Some("hello"), None);
        assert_eq!(result.processed, result.original);
        assert!(result.rules_applied.is_empty());
        assert!(!result.summary.text_modified);
    }

    #[test]
    fn dry_run_prefers_payload_over_text() {
        let rules = vec![RegexRule {
            name: "r1".to_string(),
            pattern: "hi".to_string(),
            replacement: "bye".to_string(),
            enabled: true,
        }];
        let payload = r#"{"request":{"contents":[{"parts":[{"text":"hi there"}]}]}}"#;
        let result = dry_run(&rules, Some("hi text mode"), Some(payload));
        assert!(result.summary.payload_modified);
        assert!(!result.summary.text_modified);
    }
}
