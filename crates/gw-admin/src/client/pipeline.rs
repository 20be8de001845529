use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use gw_common::{CredentialId, ErrorKind, GatewayError};
use gw_credential::{Credential, CredentialType};
use gw_proxy::{send_with_retry, HttpMethod, UpstreamRequest, UpstreamResponse};

use crate::error_response::ApiError;
use crate::state::AppState;

/// Builds the upstream auth header for a prepared credential (spec §4.2,
/// §4.6): OAuth/service-account credentials carry a bearer access token,
/// API-key credentials use Gemini's `x-goog-api-key` header.
pub fn credential_auth_header(credential: &Credential) -> Result<(&'static str, String), GatewayError> {
    match credential.kind {
        CredentialType::Oauth | CredentialType::ServiceAccount => {
            let token = credential.access_token.as_deref().ok_or_else(|| {
                GatewayError::new(ErrorKind::UpstreamAuth, "credential has no access token")
            })?;
            Ok(("authorization", format!("Bearer {token}")))
        }
        CredentialType::ApiKey => {
            let key = credential.api_key.as_deref().ok_or_else(|| {
                GatewayError::new(ErrorKind::UpstreamAuth, "credential has no api key")
            })?;
            Ok(("x-goog-api-key", key.to_string()))
        }
    }
}

/// Selects and prepares a credential for an inbound request (spec §4.1
/// `PickWithInfo` + `PrepareCredential`), converting axum's `HeaderMap`
/// into the plain string map the routing layer works with.
pub async fn pick_credential(
    state: &AppState,
    headers: &axum::http::HeaderMap,
) -> Result<Credential, ApiError> {
    let plain: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
        .collect();
    let (credential, _log_entry) = state.router.pick_with_info(&plain).await;
    credential.ok_or_else(|| {
        ApiError(GatewayError::new(
            ErrorKind::UpstreamRetryable,
            "no available credential",
        ))
    })
}

/// Sends one upstream call for `credential`, tracking in-flight capacity,
/// retrying per the configured policy, and reporting the outcome back to
/// the router and credential store (spec §4.1 `OnResult`, §4.6 usage
/// accounting). On a `401`, attempts `Compensate401` once before giving up.
pub async fn call_upstream(
    state: &AppState,
    credential: &Credential,
    method: HttpMethod,
    url: String,
    extra_headers: HashMap<String, String>,
    body: Option<Bytes>,
) -> Result<UpstreamResponse, ApiError> {
    state.credentials.acquire(&credential.id).await;
    let started = Instant::now();

    let outcome = send_with_auth(state, credential, method, &url, &extra_headers, body.clone()).await;
    let elapsed = started.elapsed();

    let outcome = match outcome {
        Ok(response) if response.status == 401 => {
            let (refreshed, refreshed_ok) = state.router.compensate_401(&credential.id).await;
            match refreshed.filter(|_| refreshed_ok) {
                Some(fresh) => {
                    tracing::debug!(credential_id = %credential.id, "refreshed credential after 401, retrying once");
                    send_with_auth(state, &fresh, method, &url, &extra_headers, body).await
                }
                None => Ok(response),
            }
        }
        other => other,
    };

    state.credentials.release(&credential.id).await;

    match outcome {
        Ok(response) => {
            report_outcome(state, &credential.id, response.status, elapsed.as_millis() as f64)
                .await;
            Ok(response)
        }
        Err(err) => {
            report_outcome(state, &credential.id, 0, elapsed.as_millis() as f64).await;
            Err(ApiError(err.to_gateway_error()))
        }
    }
}

/// Builds the auth header for `credential` and sends one retried-per-policy
/// request. Split out of [`call_upstream`] so the post-`Compensate401` retry
/// (spec §7 `UpstreamAuth` row: "on success retry once") can reuse it with a
/// freshened credential instead of resending the stale `Authorization`.
async fn send_with_auth(
    state: &AppState,
    credential: &Credential,
    method: HttpMethod,
    url: &str,
    extra_headers: &HashMap<String, String>,
    body: Option<Bytes>,
) -> Result<UpstreamResponse, gw_proxy::ProxyError> {
    let config = state.config.current();
    let (header_name, header_value) = credential_auth_header(credential)
        .map_err(|e| gw_proxy::ProxyError::Transport(e.to_string()))?;

    let mut headers = extra_headers.clone();
    headers.insert(header_name.to_string(), header_value);
    headers
        .entry("content-type".to_string())
        .or_insert_with(|| "application/json".to_string());

    let request = UpstreamRequest {
        method,
        url: url.to_string(),
        headers,
        body,
    };
    send_with_retry(state.transport.as_ref(), request, &config.retry).await
}

async fn report_outcome(state: &AppState, id: &CredentialId, status: u16, elapsed_ms: f64) {
    state.router.on_result(id, status).await;
    if status != 0 {
        state.credentials.record_outcome(id, status, elapsed_ms).await;
    }
    state
        .credentials
        .update_usage_stats(id, "requests", 1)
        .await;
}

/// `/v1/...` base URL for the configured upstream (spec §4.2).
pub fn upstream_url(state: &AppState, path: &str) -> String {
    let base = state.config.current().upstream.endpoint_url.clone();
    format!("{}{}", base.trim_end_matches('/'), path)
}
