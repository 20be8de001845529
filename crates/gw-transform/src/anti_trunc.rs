use serde_json::{json, Value as JsonValue};

/// Default truncation indicators (spec §4.5 `ResponseComplete`).
pub const DEFAULT_TRUNCATION_INDICATORS: &[&str] = &[
    "...",
    "[truncated]",
    "[continued]",
    "[incomplete]",
    "<truncated>",
    "[to be continued]",
    "[继续]",
    "[continue]",
    "[未完]",
];

const TERMINAL_PUNCTUATION: &[char] = &['.', '!', '?', '"', ')'];
const TRUNCATED_TERMINAL_PUNCTUATION: &[char] = &['.', '!', '?', '。', '！', '？', '\n', '"', '\''];

/// `HasDoneMarker` (spec §9 open question, resolved): the case-insensitive,
/// trimmed `[done]` token, standardized rather than guessing broader
/// acceptance.
pub fn has_done_marker(text: &str) -> bool {
    text.trim().to_lowercase().contains("[done]")
}

/// `ResponseComplete(text)` (spec §4.5).
pub fn response_complete(text: &str, min_completion_len: usize, indicators: &[&str]) -> bool {
    if has_done_marker(text) {
        return true;
    }
    let trimmed = text.trim();
    let len = trimmed.chars().count();
    if len >= min_completion_len {
        let lower = trimmed.to_lowercase();
        let has_indicator = indicators.iter().any(|ind| lower.contains(&ind.to_lowercase()));
        let ends_terminal = trimmed
            .chars()
            .rev()
            .find(|c| !c.is_whitespace())
            .map(|c| TERMINAL_PUNCTUATION.contains(&c))
            .unwrap_or(false);
        if !has_indicator && ends_terminal {
            return true;
        }
    }
    len > 2 * min_completion_len
}

/// `AppearsTruncated(text)` (spec §4.5). The 1000-rune threshold is kept
/// exactly as stated in the spec (§9 open question #1).
pub fn appears_truncated(text: &str, indicators: &[&str]) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    if has_done_marker(trimmed) {
        return false;
    }
    let lower = trimmed.to_lowercase();
    let ends_with_indicator = indicators
        .iter()
        .any(|ind| lower.ends_with(&ind.to_lowercase()));
    let long_without_terminal = trimmed.chars().count() > 1000
        && !trimmed
            .chars()
            .last()
            .map(|c| TRUNCATED_TERMINAL_PUNCTUATION.contains(&c))
            .unwrap_or(false);
    ends_with_indicator || long_without_terminal
}

fn clean_accumulated(text: &str, sanitizer: Option<&dyn Fn(&str) -> String>) -> String {
    let without_done = {
        let trimmed = text.trim();
        if has_done_marker(trimmed) {
            // Strip a trailing [done] token case-insensitively.
            let lower = trimmed.to_lowercase();
            if let Some(pos) = lower.rfind("[done]") {
                trimmed[..pos].trim().to_string()
            } else {
                trimmed.to_string()
            }
        } else {
            trimmed.to_string()
        }
    };
    match sanitizer {
        Some(f) => f(&without_done),
        None => without_done,
    }
}

/// `BuildContinuationPayload` (spec §4.5): appends a model turn (the
/// cleaned accumulated text, if any) and a user continuation turn onto
/// `original.request.contents`. Returns `original` unchanged if it fails
/// to parse or re-serialize as JSON.
pub fn build_continuation_payload(
    original: &str,
    accumulated: &str,
    continue_text: &str,
    sanitizer: Option<&dyn Fn(&str) -> String>,
) -> String {
    let Ok(mut value) = serde_json::from_str::<JsonValue>(original) else {
        return original.to_string();
    };
    let Some(obj) = value.as_object_mut() else {
        return original.to_string();
    };

    let request = obj
        .entry("request")
        .or_insert_with(|| json!({}));
    let Some(request_obj) = request.as_object_mut() else {
        return original.to_string();
    };
    let contents = request_obj
        .entry("contents")
        .or_insert_with(|| json!([]));
    let Some(contents_arr) = contents.as_array_mut() else {
        return original.to_string();
    };

    let cleaned = clean_accumulated(accumulated, sanitizer);
    if !cleaned.is_empty() {
        contents_arr.push(json!({
            "role": "model",
            "parts": [{"text": cleaned}],
        }));
    }

    let continuation = if continue_text.trim().is_empty() {
        "continue"
    } else {
        continue_text
    };
    contents_arr.push(json!({
        "role": "user",
        "parts": [{"text": continuation}],
    }));

    serde_json::to_string(&value).unwrap_or_else(|_| original.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_marker_short_circuits_completeness() {
        assert!(response_complete("short [DONE]", 50, DEFAULT_TRUNCATION_INDICATORS));
        assert!(has_done_marker("  [done]  "));
    }

    #[test]
    fn short_unterminated_text_is_incomplete() {
        assert!(!response_complete(
            "The answer is ",
            50,
            DEFAULT_TRUNCATION_INDICATORS
        ));
    }

    #[test]
    fn long_text_past_double_threshold_is_complete() {
        let text = "a".repeat(101);
        assert!(response_complete(&text, 50, DEFAULT_TRUNCATION_INDICATORS));
    }

    #[test]
    fn terminal_punctuation_without_indicators_is_complete() {
        let text = format!("{}.", "a".repeat(60));
        assert!(response_complete(&text, 50, DEFAULT_TRUNCATION_INDICATORS));
    }

    #[test]
    fn truncation_indicator_suffix_blocks_completeness() {
        let text = format!("{}...", "a".repeat(60));
        assert!(!response_complete(&text, 50, DEFAULT_TRUNCATION_INDICATORS));
    }

    #[test]
    fn appears_truncated_detects_indicator_suffix() {
        assert!(appears_truncated("the text cuts off...", DEFAULT_TRUNCATION_INDICATORS));
    }

    #[test]
    fn appears_truncated_false_for_done_marker() {
        assert!(!appears_truncated("all good [done]", DEFAULT_TRUNCATION_INDICATORS));
    }

    #[test]
    fn appears_truncated_long_text_without_terminal_punctuation() {
        let text = "a".repeat(1001);
        assert!(appears_truncated(&text, DEFAULT_TRUNCATION_INDICATORS));
    }

    #[test]
    fn appears_truncated_empty_text_is_false() {
        assert!(!appears_truncated("   ", DEFAULT_TRUNCATION_INDICATORS));
    }

    #[test]
    fn continuation_payload_appends_two_entries() {
        let original = r#"{"request":{"contents":[{"role":"user","parts":[{"text":"hi"}]}]}}"#;
        let once = build_continuation_payload(original, "", "continue", None);
        let twice = build_continuation_payload(&once, "", "continue", None);
        let value: JsonValue = serde_json::from_str(&twice).unwrap();
        let contents = value["request"]["contents"].as_array().unwrap();
        // original 1 + two rounds of (user-only, since accumulated empty) = 3
        assert_eq!(contents.len(), 3);
    }

    #[test]
    fn continuation_payload_includes_accumulated_model_turn() {
        let original = r#"{"request":{"contents":[]}}"#;
        let result = build_continuation_payload(original, "partial answer", "go on", None);
        let value: JsonValue = serde_json::from_str(&result).unwrap();
        let contents = value["request"]["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "model");
        assert_eq!(contents[1]["role"], "user");
        assert_eq!(contents[1]["parts"][0]["text"], "go on");
    }

    #[test]
    fn malformed_json_returns_original_unchanged() {
        let original = "not json";
        assert_eq!(
            build_continuation_payload(original, "x", "y", None),
            original
        );
    }

    #[test]
    fn blank_continue_text_defaults_to_continue() {
        let original = r#"{"request":{"contents":[]}}"#;
        let result = build_continuation_payload(original, "", "   ", None);
        let value: JsonValue = serde_json::from_str(&result).unwrap();
        assert_eq!(value["request"]["contents"][0]["parts"][0]["text"], "continue");
    }
}
