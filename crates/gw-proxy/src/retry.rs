use std::time::Duration;

use gw_config::RetryConfig;
use tracing::warn;

use crate::error::{ProxyError, ProxyResult};
use crate::transport::{UpstreamRequest, UpstreamResponse, UpstreamTransport};

/// `delay = initial * BackoffFactor^attempt`, capped at `MaxDelay` (spec
/// §4.2 "Retry policy").
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let scaled = config.initial_interval_ms as f64 * config.backoff_factor.powi(attempt as i32);
    let capped = scaled.min(config.max_interval_ms as f64).max(0.0);
    Duration::from_millis(capped as u64)
}

fn is_retryable_status(config: &RetryConfig, status: u16) -> bool {
    status == 429 || (config.on_5xx && (500..600).contains(&status))
}

/// Sends `request` via `transport`, retrying per the configured policy on
/// retryable network errors or statuses (spec §4.2 "Retry policy"). The
/// request is rebuilt fresh each attempt via `request.clone()` since the
/// body is a cheaply-cloneable `Bytes`.
pub async fn send_with_retry(
    transport: &dyn UpstreamTransport,
    request: UpstreamRequest,
    config: &RetryConfig,
) -> ProxyResult<UpstreamResponse> {
    if !config.enabled {
        return transport.send(request).await;
    }

    let mut attempt = 0u32;
    loop {
        let outcome = transport.send(request.clone()).await;
        match outcome {
            Ok(response) if !is_retryable_status(config, response.status) => return Ok(response),
            Ok(response) => {
                if attempt >= config.max_retries {
                    return Ok(response);
                }
                warn!(status = response.status, attempt, "retrying upstream call after retryable status");
            }
            Err(ProxyError::Transport(message)) if config.on_network_error => {
                if attempt >= config.max_retries {
                    return Err(ProxyError::Transport(message));
                }
                warn!(error = %message, attempt, "retrying upstream call after transport error");
            }
            Err(other) => return Err(other),
        }
        tokio::time::sleep(backoff_delay(config, attempt)).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::transport::{HttpMethod, UpstreamBody};
    use bytes::Bytes;

    struct FlakyTransport {
        calls: Arc<AtomicU32>,
        fail_first_n: u32,
        final_status: u16,
    }

    #[async_trait]
    impl UpstreamTransport for FlakyTransport {
        async fn send(&self, _request: UpstreamRequest) -> ProxyResult<UpstreamResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let status = if call < self.fail_first_n { 503 } else { self.final_status };
            Ok(UpstreamResponse {
                status,
                headers: HashMap::new(),
                body: UpstreamBody::Bytes(Bytes::new()),
            })
        }
    }

    fn req() -> UpstreamRequest {
        UpstreamRequest {
            method: HttpMethod::Post,
            url: "http://example.invalid".to_string(),
            headers: HashMap::new(),
            body: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_status_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let transport = FlakyTransport {
            calls: calls.clone(),
            fail_first_n: 2,
            final_status: 200,
        };
        let config = RetryConfig {
            max_retries: 3,
            initial_interval_ms: 10,
            ..Default::default()
        };
        let response = send_with_retry(&transport, req(), &config).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let transport = FlakyTransport {
            calls: calls.clone(),
            fail_first_n: 100,
            final_status: 200,
        };
        let config = RetryConfig {
            max_retries: 2,
            initial_interval_ms: 10,
            ..Default::default()
        };
        let response = send_with_retry(&transport, req(), &config).await.unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_delay_is_capped() {
        let config = RetryConfig {
            initial_interval_ms: 1000,
            backoff_factor: 3.0,
            max_interval_ms: 5000,
            ..Default::default()
        };
        assert_eq!(backoff_delay(&config, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 5), Duration::from_millis(5000));
    }
}
