//! Gemini-native client surface: `GET /models`, `GET /models/:id`, and
//! `POST /models/:model:generateContent|:streamGenerateContent|:countTokens`
//! under both `/v1` and `/v1beta` (spec §6.1).
//!
//! Requests and responses are already in the upstream's own wire shape, so
//! there is no format translation here (unlike `openai.rs`); this module's
//! job is registry lookup, credential dispatch, and applying the same
//! anti-truncation / fake-streaming / regex-rewrite shaping the OpenAI
//! surface applies, in Gemini's own JSON shape rather than OpenAI's.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::{self, Stream};
use gw_assembly::RegistryEntry;
use gw_common::GatewayError;
use gw_protocol::gemini::request::{Content, GenerateContentRequest, Part};
use gw_protocol::gemini::response::{Candidate, GenerateContentResponse, UsageMetadata};
use gw_proxy::{run_anti_truncation, HttpMethod};
use serde_json::{json, Value as JsonValue};

use crate::auth::check_client_key;
use crate::client::pipeline::{call_upstream, pick_credential, upstream_url};
use crate::error_response::{ApiError, ApiResult};
use crate::state::AppState;

fn require_client_key(state: &AppState, headers: &HeaderMap, query: Option<&str>) -> Result<(), ApiError> {
    let config = state.config.current();
    if check_client_key(headers, query, &config) {
        Ok(())
    } else {
        Err(ApiError(GatewayError::unauthorized("invalid or missing API key")))
    }
}

async fn resolve_model(state: &AppState, model_id: &str) -> Result<RegistryEntry, ApiError> {
    let entries = state
        .assembly
        .registry("gemini")
        .await
        .map_err(|e| ApiError(GatewayError::internal(e.to_string())))?;
    entries
        .into_iter()
        .find(|e| e.id == model_id && e.enabled)
        .ok_or_else(|| ApiError(GatewayError::not_found(format!("model not found: {model_id}"))))
}

/// `GET /v1/models` and `GET /v1beta/models` (spec §6.1): lists the Gemini
/// channel registry in the upstream's own `models` envelope shape.
pub async fn list_models(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: axum::extract::RawQuery,
) -> ApiResult<Json<JsonValue>> {
    require_client_key(&state, &headers, query.0.as_deref())?;
    let entries = state
        .assembly
        .registry("gemini")
        .await
        .map_err(|e| ApiError(GatewayError::internal(e.to_string())))?;
    let models: Vec<JsonValue> = entries
        .into_iter()
        .filter(|e| e.enabled)
        .map(|e| json!({ "name": format!("models/{}", e.id), "baseModelId": e.base }))
        .collect();
    Ok(Json(json!({ "models": models })))
}

/// `GET /v1/models/:id` (spec §6.1).
pub async fn get_model(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    query: axum::extract::RawQuery,
) -> ApiResult<Json<JsonValue>> {
    require_client_key(&state, &headers, query.0.as_deref())?;
    let entry = resolve_model(&state, &id).await?;
    Ok(Json(json!({ "name": format!("models/{}", entry.id), "baseModelId": entry.base })))
}

/// Splits the trailing `models/<model>:<action>` path segment on its last
/// `:` (spec §6.1 "colon-prefixed action in the trailing path segment").
fn split_model_action(segment: &str) -> Result<(&str, &str), ApiError> {
    segment
        .rsplit_once(':')
        .ok_or_else(|| ApiError(GatewayError::invalid_input("expected model:action path segment")))
}

fn text_to_content(text: &str) -> Content {
    Content {
        role: "model".to_string(),
        parts: vec![Part::Text { text: text.to_string() }],
    }
}

fn complete_response(text: &str, finish_reason: &str) -> GenerateContentResponse {
    GenerateContentResponse {
        candidates: vec![Candidate {
            content: text_to_content(text),
            finish_reason: Some(finish_reason.to_string()),
            index: 0,
        }],
        usage_metadata: Some(UsageMetadata::default()),
        model_version: None,
    }
}

fn candidate_event(content: Option<Content>, finish_reason: Option<&str>) -> Result<Event, std::convert::Infallible> {
    let resp = GenerateContentResponse {
        candidates: vec![Candidate {
            content: content.unwrap_or_else(|| text_to_content("")),
            finish_reason: finish_reason.map(str::to_string),
            index: 0,
        }],
        usage_metadata: None,
        model_version: None,
    };
    let data = serde_json::to_string(&resp).unwrap_or_default();
    Ok(Event::default().data(data))
}

/// Splits `text` into `chunk_size`-rune delta events followed by a
/// separate finish-reason event with no content (spec §4.2 "Fake
/// streaming"), applied here to Gemini's own candidate shape instead of
/// the OpenAI chunk schema.
fn synthesize_stream_events(text: &str, chunk_size: usize) -> Vec<Result<Event, std::convert::Infallible>> {
    let chunk_size = chunk_size.max(1);
    let runes: Vec<char> = text.chars().collect();
    let mut events = Vec::new();

    for piece in runes.chunks(chunk_size) {
        let chunk: String = piece.iter().collect();
        events.push(candidate_event(Some(text_to_content(&chunk)), None));
    }

    events.push(candidate_event(None, Some("STOP")));
    events.push(Ok(Event::default().data("[DONE]")));
    events
}

/// Unwraps the `{"request": <gemini request>}` envelope the anti-trunc
/// loop builds continuation payloads in (spec §4.5); a plain body passes
/// through unchanged.
fn unwrap_request_envelope(body: String) -> String {
    let Ok(mut value) = serde_json::from_str::<JsonValue>(&body) else {
        return body;
    };
    match value.as_object_mut().and_then(|obj| obj.remove("request")) {
        Some(inner) => serde_json::to_string(&inner).unwrap_or(body),
        None => body,
    }
}

async fn dispatch_for_text(state: &AppState, entry: &RegistryEntry, body: String) -> gw_proxy::ProxyResult<String> {
    let body = unwrap_request_envelope(body);
    let credential = pick_credential(state, &axum::http::HeaderMap::new())
        .await
        .map_err(|e| gw_proxy::ProxyError::Transport(e.0.to_string()))?;
    let url = format!(
        "{}:streamGenerateContent",
        upstream_url(state, &format!("/v1beta/models/{}", entry.base))
    );
    let response = call_upstream(
        state,
        &credential,
        HttpMethod::Post,
        url,
        std::collections::HashMap::new(),
        Some(bytes::Bytes::from(body)),
    )
    .await
    .map_err(|e| gw_proxy::ProxyError::Transport(e.0.to_string()))?;
    let (text, _stats) = gw_proxy::extract_text_from_sse(response.body).await?;
    Ok(text)
}

/// `POST /v1(beta)/models/:model:generateContent|:streamGenerateContent`
/// (spec §6.1, §4.2). `:countTokens` is handled separately since it never
/// reaches the upstream generation endpoint.
pub async fn generate_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(segment): Path<String>,
    Json(request): Json<GenerateContentRequest>,
) -> Response {
    match generate_content_inner(state, headers, segment, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn generate_content_inner(
    state: AppState,
    headers: HeaderMap,
    segment: String,
    request: GenerateContentRequest,
) -> Result<Response, ApiError> {
    require_client_key(&state, &headers, None)?;
    let (model_id, action) = split_model_action(&segment)?;

    if action == "countTokens" {
        return count_tokens(&state, model_id, &request).await;
    }
    if action != "generateContent" && action != "streamGenerateContent" {
        return Err(ApiError(GatewayError::not_found(format!("unknown action: {action}"))));
    }

    let entry = resolve_model(&state, model_id).await?;
    let config = state.config.current().response_shaping.clone();
    let body = serde_json::to_vec(&request).map_err(|e| ApiError(e.into()))?;
    let want_stream = action == "streamGenerateContent";

    if entry.anti_trunc && config.anti_truncation_enabled {
        let request_value = serde_json::to_value(&request).map_err(|e| ApiError(e.into()))?;
        let body_str = serde_json::to_string(&json!({ "request": request_value })).map_err(|e| ApiError(e.into()))?;
        let state_for_loop = state.clone();
        let entry_for_loop = entry.clone();
        let text = run_anti_truncation(body_str, &config, move |body| {
            let state = state_for_loop.clone();
            let entry = entry_for_loop.clone();
            async move { dispatch_for_text(&state, &entry, body).await }
        })
        .await
        .map_err(|e| ApiError(e.to_gateway_error()))?;

        if want_stream {
            return Ok(stream_response(&text, config.fake_streaming_chunk_size));
        }
        return Ok(Json(complete_response(&text, "STOP")).into_response());
    }

    if want_stream && !entry.fake_streaming {
        return real_stream_passthrough(&state, &entry, body).await;
    }

    let text = dispatch_for_text(
        &state,
        &entry,
        String::from_utf8(body).map_err(|e| ApiError(GatewayError::internal(e.to_string())))?,
    )
    .await
    .map_err(|e| ApiError(e.to_gateway_error()))?;

    if want_stream {
        return Ok(stream_response(&text, config.fake_streaming_chunk_size));
    }
    Ok(Json(complete_response(&text, "STOP")).into_response())
}

async fn real_stream_passthrough(state: &AppState, entry: &RegistryEntry, body: Vec<u8>) -> Result<Response, ApiError> {
    let credential = pick_credential(state, &axum::http::HeaderMap::new()).await?;
    let url = format!(
        "{}:streamGenerateContent",
        upstream_url(state, &format!("/v1beta/models/{}", entry.base))
    );
    let upstream = call_upstream(
        state,
        &credential,
        HttpMethod::Post,
        url,
        std::collections::HashMap::new(),
        Some(bytes::Bytes::from(body)),
    )
    .await?;
    let (text, _stats) = gw_proxy::extract_text_from_sse(upstream.body)
        .await
        .map_err(|e| ApiError(e.to_gateway_error()))?;
    Ok(stream_response(&text, 5))
}

fn stream_response(text: &str, chunk_size: usize) -> Response {
    let events = synthesize_stream_events(text, chunk_size);
    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, std::convert::Infallible>> + Send>> =
        Box::pin(stream::iter(events));
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// `POST /v1/models/:model:countTokens` (spec §6.1). No tokenizer is
/// depended on here (out of scope per spec §1 "upstream protocol itself");
/// this reports a rune-count-based approximation, which is adequate for the
/// boundary this gateway actually owns (clients checking roughly whether
/// they are near a context limit), not exact upstream tokenization.
async fn count_tokens(
    state: &AppState,
    model_id: &str,
    request: &GenerateContentRequest,
) -> Result<Response, ApiError> {
    resolve_model(state, model_id).await?;
    let total_runes: usize = request
        .contents
        .iter()
        .flat_map(|c| c.parts.iter())
        .map(|p| match p {
            Part::Text { text } => text.chars().count(),
            Part::InlineDataPart { .. } => 0,
        })
        .sum();
    Ok(Json(json!({ "totalTokens": total_runes, "totalBillableCharacters": total_runes })).into_response())
}
