use std::future::Future;

use gw_config::ResponseShapingConfig;
use gw_transform::{appears_truncated, build_continuation_payload, response_complete, DEFAULT_TRUNCATION_INDICATORS};
use tracing::debug;

use crate::error::ProxyResult;

/// `AppearsTruncated` + length accounting for the whole accumulated answer
/// (spec §4.2 "Anti-truncation wrapper").
pub fn needs_continuation(accumulated: &str, min_completion_len: usize) -> bool {
    !response_complete(accumulated, min_completion_len, DEFAULT_TRUNCATION_INDICATORS)
        || appears_truncated(accumulated, DEFAULT_TRUNCATION_INDICATORS)
}

/// Drives the anti-truncation continuation loop (spec §4.2): repeats up to
/// `max_attempts`, invoking `request_fn` with the (possibly rewritten)
/// request body each time, appending the extracted text to an accumulator,
/// stopping once `ResponseComplete` holds or attempts are exhausted.
///
/// Cancellation is left to ordinary async-task cancellation (dropping the
/// calling future) rather than a dedicated token, matching the crate's
/// decision to keep this pure and transport-agnostic.
pub async fn run_anti_truncation<F, Fut>(
    initial_request_body: String,
    config: &ResponseShapingConfig,
    mut request_fn: F,
) -> ProxyResult<String>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ProxyResult<String>>,
{
    let mut request_body = initial_request_body;
    let mut accumulated = String::new();

    for attempt in 0..config.anti_truncation_max_attempts.max(1) {
        let text = request_fn(request_body.clone()).await?;
        accumulated.push_str(&text);

        if response_complete(
            &accumulated,
            config.anti_truncation_min_completion_len,
            DEFAULT_TRUNCATION_INDICATORS,
        ) {
            return Ok(accumulated);
        }

        debug!(attempt, len = accumulated.len(), "response incomplete, requesting continuation");
        tokio::time::sleep(std::time::Duration::from_millis(
            config.anti_truncation_retry_delay_ms,
        ))
        .await;
        request_body = build_continuation_payload(&request_body, &accumulated, "continue", None);
    }

    Ok(accumulated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config(max_attempts: u32) -> ResponseShapingConfig {
        ResponseShapingConfig {
            anti_truncation_max_attempts: max_attempts,
            anti_truncation_retry_delay_ms: 0,
            anti_truncation_min_completion_len: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn stops_as_soon_as_response_is_complete() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result = run_anti_truncation(
            r#"{"request":{"contents":[]}}"#.to_string(),
            &config(5),
            move |_body| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("a complete sentence that ends properly.".to_string())
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.ends_with('.'));
    }

    #[tokio::test]
    async fn continues_until_attempts_exhausted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result = run_anti_truncation(
            r#"{"request":{"contents":[]}}"#.to_string(),
            &config(3),
            move |_body| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("...".to_string())
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result, "..." .repeat(3));
    }
}
