//! Format translation (OpenAI ⇄ Gemini), anti-truncation heuristics, and
//! the deterministic regex-rewrite engine (spec §4.2, §4.5).
//!
//! Pure logic: no I/O, no async. `gw-proxy` drives these functions around
//! actual upstream calls.

mod anti_trunc;
mod format;
mod regex_rewrite;
mod response;

pub use anti_trunc::{
    appears_truncated, build_continuation_payload, has_done_marker, response_complete,
    DEFAULT_TRUNCATION_INDICATORS,
};
pub use format::{
    detect_format, gemini_request_to_openai, inline_data_to_data_url, openai_request_to_gemini,
    Format, DEFAULT_TOP_K, MAX_OUTPUT_TOKENS, MAX_TOP_K,
};
pub use regex_rewrite::{
    dry_run, DryRunResult, DryRunRuleResult, DryRunSummary, RegexEngine, RegexRule,
};
pub use response::gemini_response_to_openai;
