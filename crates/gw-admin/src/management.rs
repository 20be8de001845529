//! Management API (spec §6.2): config inspection/mutation, credential
//! CRUD, model registry/variant-config CRUD, assembly plan lifecycle,
//! routing-state persistence, and the anti-truncation/regex dry-run
//! preview. Mounted at `<base>/routes/api/management`, gated by
//! [`crate::auth::management_auth`].
//!
//! Handlers here assume the privilege check already happened in
//! middleware; write endpoints additionally rely on the middleware having
//! rejected read-only callers before the body is ever parsed.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use gw_assembly::{PlanInclude, RegistryEntry, VariantConfig};
use gw_common::{CredentialId, GatewayError};
use gw_credential::{Credential, CredentialType};
use gw_transform::{dry_run, RegexRule};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::error_response::{ApiError, ApiResult};
use crate::state::{AppState, GatewayEvent};

fn internal(e: impl std::fmt::Display) -> ApiError {
    ApiError(GatewayError::internal(e.to_string()))
}

/// `GET /capabilities` (spec §6.2): backend type and feature flags, so an
/// admin UI can hide controls the current storage backend can't support.
pub async fn capabilities(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    let stats = state.storage.storage_stats().await.map_err(internal)?;
    Ok(Json(json!({
        "backend": stats.backend,
        "transactional": true,
        "credential_count": stats.credential_count,
        "config_count": stats.config_count,
    })))
}

/// `GET /config` (spec §6.2): the full merged, domain-scoped configuration.
pub async fn get_config(State(state): State<AppState>) -> Json<JsonValue> {
    let config = state.config.current();
    Json(serde_json::to_value(config.as_ref()).unwrap_or(JsonValue::Null))
}

/// `PUT /config` (spec §6.2): applies a merge-patch over the current
/// config, persists it, and notifies subscribers via the same path a file
/// hot-reload would take.
pub async fn put_config(
    State(state): State<AppState>,
    Json(patch): Json<JsonValue>,
) -> ApiResult<Json<JsonValue>> {
    let updated = state.config.patch(patch).map_err(internal)?;
    Ok(Json(serde_json::to_value(updated.as_ref()).unwrap_or(JsonValue::Null)))
}

#[derive(Debug, Deserialize)]
pub struct CredentialUpload {
    #[serde(flatten)]
    credential: Credential,
}

/// `POST /credentials` / `/credentials/upload` (spec §6.2): accepts one
/// JSON-encoded credential record, stamps lifecycle timestamps, and adds
/// it to both the authoritative store and persistent storage. Zip/
/// multipart import is named in §1 as an out-of-scope external boundary
/// (multipart parsing), so only the single-JSON path is implemented here.
pub async fn upload_credential(
    State(state): State<AppState>,
    Json(upload): Json<CredentialUpload>,
) -> ApiResult<Json<JsonValue>> {
    let mut credential = upload.credential;
    let now = gw_common::now_unix();
    credential.created_at = now;
    credential.updated_at = now;
    state
        .credentials
        .upsert(credential.clone())
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "id": credential.id.as_str(), "kind": credential.kind })))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    #[serde(flatten)]
    credential: Credential,
}

/// `POST /credentials/validate` (spec §6.2): structural validation only
/// (required secret fields present for the declared `kind`); the upstream
/// liveness check lives at `/credentials/probe`, grounded on a real
/// `generateContent` call through the normal dispatch path.
pub async fn validate_credential(Json(req): Json<ValidateRequest>) -> Json<JsonValue> {
    let cred = req.credential;
    let problems = structural_problems(&cred);
    Json(json!({ "valid": problems.is_empty(), "problems": problems }))
}

#[derive(Debug, Deserialize)]
pub struct ValidateBatchRequest {
    credentials: Vec<Credential>,
}

/// `POST /credentials/validate-batch` (spec §6.2): structural validation
/// over a JSON array of credentials in one call. The sibling
/// `validate-zip` path requires multipart/zip parsing, named out of scope
/// in spec §1, so only this JSON-array form is implemented.
pub async fn validate_credential_batch(Json(req): Json<ValidateBatchRequest>) -> Json<JsonValue> {
    let results: Vec<JsonValue> = req
        .credentials
        .iter()
        .map(|cred| {
            let problems = structural_problems(cred);
            json!({ "id": cred.id.as_str(), "valid": problems.is_empty(), "problems": problems })
        })
        .collect();
    let all_valid = results.iter().all(|r| r["valid"].as_bool().unwrap_or(false));
    Json(json!({ "valid": all_valid, "results": results }))
}

fn structural_problems(cred: &Credential) -> Vec<String> {
    let mut problems = Vec::new();
    match cred.kind {
        CredentialType::Oauth | CredentialType::ServiceAccount => {
            if cred.refresh_token.is_none() {
                problems.push("missing refresh_token".to_string());
            }
            if cred.client_id.is_none() {
                problems.push("missing client_id".to_string());
            }
            if cred.client_secret.is_none() {
                problems.push("missing client_secret".to_string());
            }
        }
        CredentialType::ApiKey => {
            if cred.api_key.is_none() {
                problems.push("missing api_key".to_string());
            }
        }
    }
    problems
}

/// `POST /credentials/probe` (spec §6.2, §6.3 `auto_probe_history`):
/// dispatches a minimal `generateContent` call through the prepared
/// credential and records the outcome.
pub async fn probe_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    let credential_id = CredentialId::new(id);
    let credential = state
        .credentials
        .get_credential_by_id(&credential_id)
        .await
        .ok_or_else(|| ApiError(GatewayError::not_found(format!("credential not found: {credential_id}"))))?;
    let prepared = state.router.prepare_credential(credential).await;

    let config = state.config.current();
    let model = &config.auto_probe.model;
    let url = format!(
        "{}/v1beta/models/{}:generateContent",
        config.upstream.endpoint_url.trim_end_matches('/'),
        model
    );
    let body = json!({ "contents": [{ "role": "user", "parts": [{ "text": "ping" }] }] });

    let (auth_name, auth_value) = crate::client::pipeline::credential_auth_header(&prepared).map_err(ApiError)?;
    let mut headers = HashMap::new();
    headers.insert(auth_name.to_string(), auth_value);
    headers.insert("content-type".to_string(), "application/json".to_string());

    let outcome = state
        .transport
        .send(gw_proxy::UpstreamRequest {
            method: gw_proxy::HttpMethod::Post,
            url,
            headers,
            body: Some(bytes::Bytes::from(serde_json::to_vec(&body).map_err(|e| ApiError(e.into()))?)),
        })
        .await;

    let (ok, status) = match &outcome {
        Ok(response) => (response.status < 400, response.status),
        Err(_) => (false, 0),
    };
    state.router.on_result(&credential_id, status).await;

    let mut history: Vec<JsonValue> = state
        .storage
        .get_config("auto_probe_history")
        .await
        .map_err(internal)?
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    history.push(json!({
        "credential_id": credential_id.as_str(),
        "status": status,
        "ok": ok,
        "at": gw_common::now_unix(),
    }));
    if history.len() > 200 {
        let drop_count = history.len() - 200;
        history.drain(0..drop_count);
    }
    state
        .storage
        .set_config("auto_probe_history", serde_json::to_value(&history).map_err(|e| ApiError(e.into()))?)
        .await
        .map_err(internal)?;

    Ok(Json(json!({ "ok": ok, "status": status })))
}

/// `DELETE /credentials/:id` (spec §6.2, implied by credential CRUD).
pub async fn delete_credential(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.storage.delete_credential(&id).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, serde::Serialize)]
struct CredentialSummary {
    id: String,
    kind: CredentialType,
    disabled: bool,
    auto_banned: bool,
    health_score: f64,
    error_rate: f64,
    daily_usage: u64,
    daily_limit: u64,
}

impl From<&Credential> for CredentialSummary {
    fn from(c: &Credential) -> Self {
        Self {
            id: c.id.as_str().to_string(),
            kind: c.kind,
            disabled: c.health.disabled,
            auto_banned: c.health.auto_banned,
            health_score: c.health.health_score,
            error_rate: c.health.error_rate,
            daily_usage: c.health.daily_usage,
            daily_limit: c.health.daily_limit,
        }
    }
}

/// `GET /assembly/credentials` (spec §6.2): redacted credential summaries
/// (no tokens/keys/secrets), matching the §7 policy of never surfacing
/// secret material outside the request-dispatch path.
pub async fn assembly_credentials(State(state): State<AppState>) -> Json<JsonValue> {
    let creds = state.credentials.get_all_credentials().await;
    let summaries: Vec<CredentialSummary> = creds.iter().map(CredentialSummary::from).collect();
    Json(json!({ "credentials": summaries }))
}

#[derive(Debug, Deserialize)]
pub struct EnableDisableRequest {
    ids: Vec<String>,
}

pub async fn enable_credentials(State(state): State<AppState>, Json(req): Json<EnableDisableRequest>) -> StatusCode {
    let ids: Vec<CredentialId> = req.ids.into_iter().map(CredentialId::new).collect();
    state.credentials.enable_credentials(&ids).await;
    StatusCode::NO_CONTENT
}

pub async fn disable_credentials(State(state): State<AppState>, Json(req): Json<EnableDisableRequest>) -> StatusCode {
    let ids: Vec<CredentialId> = req.ids.into_iter().map(CredentialId::new).collect();
    state.credentials.disable_credentials(&ids).await;
    StatusCode::NO_CONTENT
}

/// `GET /models/registry?channel=openai|gemini` (spec §6.2).
pub async fn get_registry(
    State(state): State<AppState>,
    axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
) -> ApiResult<Json<JsonValue>> {
    let channel = params.get("channel").map(String::as_str).unwrap_or("openai");
    let entries = state.assembly.registry(channel).await.map_err(internal)?;
    Ok(Json(json!({ "channel": channel, "entries": entries })))
}

#[derive(Debug, Deserialize)]
pub struct SetRegistryRequest {
    channel: String,
    entries: Vec<RegistryEntry>,
}

/// `PUT /models/registry` (spec §6.2): replaces one channel's registry
/// wholesale.
pub async fn put_registry(State(state): State<AppState>, Json(req): Json<SetRegistryRequest>) -> ApiResult<StatusCode> {
    state
        .assembly
        .set_registry(&req.channel, req.entries)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UpsertEntryRequest {
    channel: String,
    #[serde(flatten)]
    entry: RegistryEntry,
}

/// `POST/PUT /models/registry/:id` (spec §6.2): upsert a single entry.
pub async fn upsert_registry_entry(
    State(state): State<AppState>,
    Path(_id): Path<String>,
    Json(req): Json<UpsertEntryRequest>,
) -> ApiResult<StatusCode> {
    state
        .assembly
        .upsert_registry_entry(&req.channel, req.entry)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /models/registry/:id?channel=openai|gemini` (spec §6.2).
pub async fn delete_registry_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
) -> ApiResult<StatusCode> {
    let channel = params.get("channel").map(String::as_str).unwrap_or("openai");
    state
        .assembly
        .delete_registry_entry(channel, &id)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /models/variant-config` (spec §6.2, §3.5).
pub async fn get_variant_config(State(state): State<AppState>) -> ApiResult<Json<VariantConfig>> {
    Ok(Json(state.assembly.variant_config().await.map_err(internal)?))
}

/// `PUT /models/variant-config` (spec §6.2, §3.5).
pub async fn put_variant_config(
    State(state): State<AppState>,
    Json(config): Json<VariantConfig>,
) -> ApiResult<StatusCode> {
    state.assembly.set_variant_config(config).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /models/generate-variants?channel=openai|gemini` (spec §6.2,
/// §3.4, §3.5): derives every variant without persisting anything.
pub async fn generate_variants(
    State(state): State<AppState>,
    axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
) -> ApiResult<Json<JsonValue>> {
    let channel = params.get("channel").map(String::as_str).unwrap_or("openai");
    let variants = state.assembly.generate_variants(channel).await.map_err(internal)?;
    Ok(Json(json!({ "channel": channel, "variants": variants })))
}

/// `GET /assembly/overview` (spec §6.2): a rollup of registry sizes,
/// credential pool size, and routing state, for a single-call admin
/// dashboard refresh.
pub async fn assembly_overview(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    let openai = state.assembly.registry("openai").await.map_err(internal)?;
    let gemini = state.assembly.registry("gemini").await.map_err(internal)?;
    let creds = state.credentials.get_all_credentials().await;
    let (sticky_count, cooldowns) = state.router.snapshot().await;
    Ok(Json(json!({
        "models": { "openai": openai.len(), "gemini": gemini.len() },
        "credentials": creds.len(),
        "sticky_entries": sticky_count,
        "cooldowns": cooldowns.len(),
    })))
}

/// `GET /assembly/models` (spec §6.2): both channels' full registries.
pub async fn assembly_models(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    let openai = state.assembly.registry("openai").await.map_err(internal)?;
    let gemini = state.assembly.registry("gemini").await.map_err(internal)?;
    Ok(Json(json!({ "openai": openai, "gemini": gemini })))
}

#[derive(Debug, serde::Serialize)]
struct CooldownView {
    credential_id: String,
    strikes: u32,
    remaining_secs: u64,
}

/// `GET /assembly/routing` (spec §6.2): sticky-entry count and active
/// cooldowns (spec §4.1 `Snapshot`).
pub async fn assembly_routing(State(state): State<AppState>) -> Json<JsonValue> {
    let (sticky_count, cooldowns) = state.router.snapshot().await;
    let cooldowns: Vec<CooldownView> = cooldowns
        .into_iter()
        .map(|c| CooldownView {
            credential_id: c.credential_id.as_str().to_string(),
            strikes: c.strikes,
            remaining_secs: c.remaining_secs,
        })
        .collect();
    Json(json!({ "sticky_entries": sticky_count, "cooldowns": cooldowns }))
}

/// `GET /assembly/usage` (spec §6.2): per-credential daily usage summary.
pub async fn assembly_usage(State(state): State<AppState>) -> Json<JsonValue> {
    let creds = state.credentials.get_all_credentials().await;
    let usage: Vec<JsonValue> = creds
        .iter()
        .map(|c| json!({ "id": c.id.as_str(), "daily_usage": c.health.daily_usage, "daily_limit": c.health.daily_limit }))
        .collect();
    Json(json!({ "usage": usage }))
}

/// `GET /assembly/dashboard` (spec §6.2): combined overview for a single
/// admin-UI page load.
pub async fn assembly_dashboard(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    let overview = assembly_overview(State(state.clone())).await?.0;
    let routing = assembly_routing(State(state)).await.0;
    Ok(Json(json!({ "overview": overview, "routing": routing })))
}

#[derive(Debug, Deserialize)]
pub struct SavePlanRequest {
    name: String,
    #[serde(default)]
    models: bool,
    #[serde(default)]
    variants: bool,
}

/// `POST /assembly/plans` (spec §6.2, §4.3 `SavePlan`).
pub async fn save_plan(State(state): State<AppState>, Json(req): Json<SavePlanRequest>) -> ApiResult<Json<JsonValue>> {
    let include = if !req.models && !req.variants {
        PlanInclude::default()
    } else {
        PlanInclude { models: req.models, variants: req.variants }
    };
    let name = state.assembly.save_plan(&req.name, include).await.map_err(internal)?;
    Ok(Json(json!({ "name": name })))
}

/// `GET /assembly/plans` (spec §6.2).
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    let plans = state.assembly.list_plans().await.map_err(internal)?;
    Ok(Json(json!({ "plans": plans })))
}

/// `GET /assembly/plans/:name` (spec §6.2).
pub async fn get_plan(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<JsonValue>> {
    let plan = state.assembly.get_plan(&name).await.map_err(plan_error)?;
    Ok(Json(serde_json::to_value(plan).map_err(|e| ApiError(e.into()))?))
}

/// `DELETE /assembly/plans/:name` (spec §6.2).
pub async fn delete_plan(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<StatusCode> {
    state.assembly.delete_plan(&name).await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

fn plan_error(e: gw_assembly::AssemblyError) -> ApiError {
    match e {
        gw_assembly::AssemblyError::PlanNotFound(name) => {
            ApiError(GatewayError::not_found(format!("plan not found: {name}")))
        }
        gw_assembly::AssemblyError::BackupNotFound(name) => {
            ApiError(GatewayError::not_found(format!("no backup for plan: {name}")))
        }
        other => internal(other),
    }
}

/// `PUT /assembly/plans/:name/apply` (spec §6.2, §4.3 `ApplyPlan`).
pub async fn apply_plan(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<JsonValue>> {
    let diff = state.assembly.apply_plan(&name).await.map_err(plan_error)?;
    state.emit(GatewayEvent::PlanApplied { plan: name.clone() });
    Ok(Json(json!({ "plan": name, "diff": diff })))
}

/// `PUT /assembly/plans/:name/rollback` (spec §6.2, §4.3 `RollbackPlan`).
pub async fn rollback_plan(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<JsonValue>> {
    let diff = state.assembly.rollback_plan(&name).await.map_err(plan_error)?;
    state.emit(GatewayEvent::PlanRolledBack { plan: name.clone() });
    Ok(Json(json!({ "plan": name, "diff": diff })))
}

/// `GET /assembly/plans/:name/dry-run/apply` (spec §6.2, §4.3 `DiffApply`).
pub async fn dry_run_apply(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<JsonValue>> {
    let diff = state.assembly.diff_apply(&name).await.map_err(plan_error)?;
    Ok(Json(json!({ "plan": name, "diff": diff })))
}

/// `GET /assembly/plans/:name/dry-run/rollback` (spec §6.2, §4.3
/// `DiffRollback`).
pub async fn dry_run_rollback(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<JsonValue>> {
    let diff = state.assembly.diff_rollback(&name).await.map_err(plan_error)?;
    Ok(Json(json!({ "plan": name, "diff": diff })))
}

/// `POST /assembly/dry-run` (spec §6.2, §4.3 `DiffPlan`): diff an inline
/// plan payload against current state without touching storage.
pub async fn dry_run_inline(
    State(state): State<AppState>,
    Json(plan): Json<gw_assembly::Plan>,
) -> ApiResult<Json<JsonValue>> {
    let diff = state.assembly.diff_plan(&plan).await.map_err(internal)?;
    Ok(Json(json!({ "diff": diff })))
}

/// `POST /routing/persist` (spec §6.2, §4.3 `SaveRoutingState`).
pub async fn routing_persist(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.assembly.save_routing_state().await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /routing/restore` (spec §6.2, §4.3 `RestoreRoutingState`).
pub async fn routing_restore(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.assembly.restore_routing_state().await.map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ClearCooldownsRequest {
    All { all: bool },
    Ids { ids: Vec<String> },
}

/// `POST /assembly/cooldowns/clear` (spec §6.2): clear by explicit ID list
/// or `{"all": true}`.
pub async fn clear_cooldowns(State(state): State<AppState>, Json(req): Json<ClearCooldownsRequest>) -> StatusCode {
    match req {
        ClearCooldownsRequest::All { all: true } => state.router.clear_all_cooldowns().await,
        ClearCooldownsRequest::All { all: false } => {}
        ClearCooldownsRequest::Ids { ids } => {
            for id in ids {
                state.router.clear_cooldown(&CredentialId::new(id)).await;
            }
        }
    }
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct AntiTruncDryRunRequest {
    #[serde(default)]
    rules: Vec<RegexRule>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    payload: Option<String>,
}

/// `POST /antitrunc/dry-run` (spec §6.2, §4.5 `DryRun`): preview regex
/// replacement over either raw text or a request payload, without
/// persisting anything. Payload wins if both are given.
pub async fn antitrunc_dry_run(Json(req): Json<AntiTruncDryRunRequest>) -> Json<JsonValue> {
    let result = dry_run(&req.rules, req.text.as_deref(), req.payload.as_deref());
    Json(serde_json::to_value(result).unwrap_or(JsonValue::Null))
}

pub async fn not_implemented() -> Response {
    ApiError(GatewayError::not_supported("management endpoint")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_common::CredentialId;

    fn api_key_cred(id: &str, key: Option<&str>) -> Credential {
        let mut cred = Credential::new(CredentialId::new(id.to_string()), CredentialType::ApiKey, 0);
        cred.api_key = key.map(str::to_string);
        cred
    }

    #[test]
    fn structural_problems_flags_missing_api_key() {
        let cred = api_key_cred("c1", None);
        assert_eq!(structural_problems(&cred), vec!["missing api_key".to_string()]);

        let cred = api_key_cred("c2", Some("sk-live"));
        assert!(structural_problems(&cred).is_empty());
    }

    #[tokio::test]
    async fn validate_batch_reports_per_credential_results() {
        let req = ValidateBatchRequest {
            credentials: vec![api_key_cred("ok", Some("sk-1")), api_key_cred("bad", None)],
        };
        let Json(body) = validate_credential_batch(Json(req)).await;
        assert_eq!(body["valid"], json!(false));
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["valid"], json!(true));
        assert_eq!(results[1]["valid"], json!(false));
    }
}
