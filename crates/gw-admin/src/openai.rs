//! OpenAI-compatible client surface: `/v1/models`, `/v1/chat/completions`,
//! and the lighter-weight legacy/unsupported endpoints named on the same
//! surface.
//!
//! Every handler here shares one shape: check the client key, look up the
//! requested model in the OpenAI channel registry, translate the request to
//! Gemini's wire format, dispatch it through `crate::client::pipeline`, and
//! translate the response back.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::{self, Stream};
use gw_assembly::RegistryEntry;
use gw_common::{now_unix, ErrorKind, GatewayError};
use gw_protocol::openai::response::{ChatChoice, ChatCompletionResponse, ChatMessage, ChatMessageContent, ChatUsage};
use gw_protocol::ChatCompletionRequest;
use gw_proxy::{extract_text_from_sse, run_anti_truncation, synthesize_fake_stream_chunks, format_sse_frame, HttpMethod};
use gw_transform::{gemini_response_to_openai, openai_request_to_gemini};
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
        .registry("openai")
        .await
        .map_err(|e| ApiError(GatewayError::internal(e.to_string())))?;
    entries
        .into_iter()
        .find(|e| e.id == model_id && e.enabled)
        .ok_or_else(|| ApiError(GatewayError::not_found(format!("model not found: {model_id}"))))
}

/// `GET /v1/models` (spec §6.1): lists every enabled entry in the OpenAI
/// channel registry in the OpenAI `list` envelope shape.
pub async fn list_models(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<JsonValue>> {
    require_client_key(&state, &headers, None)?;
    let entries = state
        .assembly
        .registry("openai")
        .await
        .map_err(|e| ApiError(GatewayError::internal(e.to_string())))?;
    let data: Vec<JsonValue> = entries
        .into_iter()
        .filter(|e| e.enabled)
        .map(|e| {
            json!({
                "id": e.id,
                "object": "model",
                "created": 0,
                "owned_by": "gateway",
            })
        })
        .collect();
    Ok(Json(json!({ "object": "list", "data": data })))
}

/// `GET /v1/models/:id` (spec §6.1).
pub async fn get_model(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    require_client_key(&state, &headers, None)?;
    let entry = resolve_model(&state, &id).await?;
    Ok(Json(json!({
        "id": entry.id,
        "object": "model",
        "created": 0,
        "owned_by": "gateway",
    })))
}

fn chat_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4())
}

/// `POST /v1/chat/completions` (spec §6.1, §4.2): the main request path.
/// Streaming, anti-truncation, and fake-streaming each apply at most one at
/// a time per the resolved registry entry's flags; a model flagged both
/// `anti_trunc` and `fake_streaming` runs anti-truncation to completion and
/// then fake-streams the assembled result, since the two features answer
/// different questions (is the *answer* complete vs. does the *client* see
/// incremental deltas) and compose cleanly.
pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    match chat_completions_inner(state, headers, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn chat_completions_inner(
    state: AppState,
    headers: HeaderMap,
    request: ChatCompletionRequest,
) -> Result<Response, ApiError> {
    require_client_key(&state, &headers, None)?;
    let entry = resolve_model(&state, &request.model).await?;
    let gemini_request = openai_request_to_gemini(&request);
    let body = serde_json::to_vec(&gemini_request).map_err(|e| ApiError(e.into()))?;
    let want_stream = request.stream.unwrap_or(false);

    let config = state.config.current().response_shaping.clone();
    let id = chat_completion_id();
    let created = now_unix();

    if entry.anti_trunc && config.anti_truncation_enabled {
        let gemini_value = serde_json::to_value(&gemini_request).map_err(|e| ApiError(e.into()))?;
        let body_str = serde_json::to_string(&json!({ "request": gemini_value }))
            .map_err(|e| ApiError(e.into()))?;
        let state_for_loop = state.clone();
        let entry_for_loop = entry.clone();
        let text = run_anti_truncation(body_str, &config, move |body| {
            let state = state_for_loop.clone();
            let entry = entry_for_loop.clone();
            async move { dispatch_for_text(&state, &entry, body).await }
        })
        .await
        .map_err(|e| ApiError(e.to_gateway_error()))?;

        if want_stream || entry.fake_streaming {
            return Ok(fake_stream_response(&text, None, &entry.base, id, created, config.fake_streaming_chunk_size));
        }
        return Ok(Json(complete_response(&text, None, &entry.base, id, created)).into_response());
    }

    if want_stream && !entry.fake_streaming {
        return real_stream_response(state, entry, body).await;
    }

    let text = dispatch_for_text(&state, &entry, String::from_utf8(body).map_err(|e| ApiError(GatewayError::internal(e.to_string())))?).await.map_err(|e| ApiError(e.to_gateway_error()))?;

    if want_stream || entry.fake_streaming {
        return Ok(fake_stream_response(&text, None, &entry.base, id, created, config.fake_streaming_chunk_size));
    }
    Ok(Json(complete_response(&text, None, &entry.base, id, created)).into_response())
}

/// Unwraps the `{"request": <gemini request>}` envelope anti-truncation
/// continuation payloads are built in (spec §4.5 `BuildContinuationPayload`
/// navigates `.request.contents`); a plain (unwrapped) body is passed
/// through unchanged, since only the anti-trunc loop ever produces the
/// wrapped shape.
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
    let (text, _stats) = extract_text_from_sse(response.body).await?;
    Ok(text)
}

async fn real_stream_response(
    state: AppState,
    entry: RegistryEntry,
    body: Vec<u8>,
) -> Result<Response, ApiError> {
    let credential = pick_credential(&state, &axum::http::HeaderMap::new()).await?;
    let url = format!(
        "{}:streamGenerateContent",
        upstream_url(&state, &format!("/v1beta/models/{}", entry.base))
    );
    let upstream = call_upstream(
        &state,
        &credential,
        HttpMethod::Post,
        url,
        std::collections::HashMap::new(),
        Some(bytes::Bytes::from(body)),
    )
    .await?;

    let (text, _stats) = extract_text_from_sse(upstream.body)
        .await
        .map_err(|e| ApiError(e.to_gateway_error()))?;
    Ok(fake_stream_response(&text, None, &entry.base, chat_completion_id(), now_unix(), 5))
}

fn fake_stream_response(
    text: &str,
    finish_reason: Option<&str>,
    model: &str,
    id: String,
    created: i64,
    chunk_size: usize,
) -> Response {
    let chunks = synthesize_fake_stream_chunks(text, Some(finish_reason.unwrap_or("stop")), model, id, created, chunk_size.max(1));
    let frames: Vec<Result<Event, std::convert::Infallible>> = chunks
        .iter()
        .map(|chunk| {
            let frame = format_sse_frame(chunk).unwrap_or_default();
            Ok(Event::default().data(frame.trim_start_matches("data: ").trim_end().to_string()))
        })
        .collect();
    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, std::convert::Infallible>> + Send>> =
        Box::pin(stream::iter(frames));
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn complete_response(text: &str, finish_reason: Option<&str>, model: &str, id: String, created: i64) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created,
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: Some(ChatMessageContent::Text(text.to_string())),
                name: None,
            },
            finish_reason: Some(finish_reason.unwrap_or("stop").to_string()),
        }],
        usage: Some(ChatUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        }),
    }
}

/// `POST /v1/completions` (spec §6.1): the legacy text-completion shape,
/// shimmed onto the same chat pipeline as a single user message.
pub async fn completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Response {
    let prompt = body.get("prompt").and_then(|p| p.as_str()).unwrap_or_default();
    let model = body.get("model").and_then(|m| m.as_str()).unwrap_or_default().to_string();
    let request = ChatCompletionRequest {
        model,
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: Some(ChatMessageContent::Text(prompt.to_string())),
            name: None,
        }],
        temperature: None,
        top_p: None,
        top_k: None,
        max_tokens: None,
        stream: body.get("stream").and_then(|s| s.as_bool()),
        tools: None,
        stop: None,
        extra: Default::default(),
    };
    chat_completions(State(state), headers, Json(request)).await
}

/// `POST /v1/responses` (spec §6.1): the newer Responses API shape is not
/// modeled in `gw-protocol` (only chat-completions and generateContent are),
/// so this surface reports `NotSupported` rather than guessing at a
/// translation.
pub async fn responses(State(_state): State<AppState>, _headers: HeaderMap) -> ApiError {
    ApiError(GatewayError::not_supported("/v1/responses"))
}

/// `POST /v1/images/generations` (spec §6.1): the upstream this gateway
/// pools credentials for is a text/chat model family; image generation has
/// no translation target.
pub async fn images_generations(State(_state): State<AppState>, _headers: HeaderMap) -> ApiError {
    ApiError(GatewayError::not_supported("/v1/images/generations"))
}

#[allow(dead_code)]
fn unused_query_hint(_q: Query<std::collections::HashMap<String, String>>) {}
