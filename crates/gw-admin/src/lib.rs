//! HTTP surface wiring: OpenAI-compatible and Gemini-native client
//! endpoints, and the management API (spec §6.1, §6.2).

pub mod auth;
pub mod client;
pub mod error_response;
pub mod gemini;
pub mod management;
pub mod openai;
pub mod state;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;

pub use state::AppState;

/// Builds the full gateway router: OpenAI-compatible surface under
/// `<base>/v1`, Gemini-native surface under `<base>/v1` and
/// `<base>/v1beta`, and the management API under
/// `<base>/routes/api/management` (spec §6.1, §6.2).
///
/// `base_path` is `config.server.base_path` (already normalized to a
/// leading-slash, no-trailing-slash form by `gw-config::normalize_base_path`).
pub fn router(state: AppState, base_path: &str) -> Router {
    let base = base_path.trim_end_matches('/');

    // `GET /models` and `GET /models/:id` are named under both the
    // OpenAI-compatible and Gemini-native surfaces at the identical `<base>/v1`
    // path (spec §6.1); since clients driving `generateContent` never need a
    // listing to operate, `<base>/v1`'s listing uses the OpenAI shape and
    // `<base>/v1beta`'s listing uses the Gemini shape, avoiding a duplicate
    // route registration for the same method and path.
    let openai_routes = Router::new()
        .route("/models", get(openai::list_models))
        .route("/models/{id}", get(openai::get_model))
        .route("/chat/completions", post(openai::chat_completions))
        .route("/completions", post(openai::completions))
        .route("/responses", post(openai::responses))
        .route("/images/generations", post(openai::images_generations));

    let gemini_post_only = Router::new().route("/models/{model_action}", post(gemini::generate_content));

    let gemini_routes = Router::new()
        .route("/models", get(gemini::list_models))
        .route("/models/{id}", get(gemini::get_model))
        .route("/models/{model_action}", post(gemini::generate_content));

    let management_routes = Router::new()
        .route("/capabilities", get(management::capabilities))
        .route("/config", get(management::get_config).put(management::put_config))
        .route("/credentials", post(management::upload_credential))
        .route("/credentials/upload", post(management::upload_credential))
        .route("/credentials/validate", post(management::validate_credential))
        .route("/credentials/validate-batch", post(management::validate_credential_batch))
        .route("/credentials/validate-zip", post(management::not_implemented))
        .route("/credentials/probe/{id}", post(management::probe_credential))
        .route("/credentials/{id}", delete(management::delete_credential))
        .route("/models/registry", get(management::get_registry).put(management::put_registry))
        .route(
            "/models/registry/{id}",
            post(management::upsert_registry_entry)
                .put(management::upsert_registry_entry)
                .delete(management::delete_registry_entry),
        )
        .route(
            "/models/variant-config",
            get(management::get_variant_config).put(management::put_variant_config),
        )
        .route("/models/generate-variants", get(management::generate_variants))
        .route("/assembly/overview", get(management::assembly_overview))
        .route("/assembly/models", get(management::assembly_models))
        .route("/assembly/routes-meta", get(management::assembly_models))
        .route("/assembly/credentials", get(management::assembly_credentials))
        .route("/assembly/credentials/enable", post(management::enable_credentials))
        .route("/assembly/credentials/disable", post(management::disable_credentials))
        .route("/assembly/routing", get(management::assembly_routing))
        .route("/assembly/usage", get(management::assembly_usage))
        .route("/assembly/dashboard", get(management::assembly_dashboard))
        .route(
            "/assembly/plans",
            get(management::list_plans).post(management::save_plan),
        )
        .route(
            "/assembly/plans/{name}",
            get(management::get_plan).delete(management::delete_plan),
        )
        .route("/assembly/plans/{name}/apply", put(management::apply_plan))
        .route("/assembly/plans/{name}/rollback", put(management::rollback_plan))
        .route("/assembly/plans/{name}/dry-run/apply", get(management::dry_run_apply))
        .route(
            "/assembly/plans/{name}/dry-run/rollback",
            get(management::dry_run_rollback),
        )
        .route("/assembly/dry-run", post(management::dry_run_inline))
        .route("/assembly/cooldowns/clear", post(management::clear_cooldowns))
        .route("/routing/persist", post(management::routing_persist))
        .route("/routing/restore", post(management::routing_restore))
        .route("/antitrunc/dry-run", post(management::antitrunc_dry_run))
        .route("/logs/stream", get(management::not_implemented))
        .layer(middleware::from_fn_with_state(state.clone(), auth::management_auth));

    Router::new()
        .nest(&format!("{base}/v1"), openai_routes.merge(gemini_post_only))
        .nest(&format!("{base}/v1beta"), gemini_routes)
        .nest(&format!("{base}/routes/api/management"), management_routes)
        .route(
            &format!("{base}/api/management/{{*rest}}"),
            get(redirect_legacy_management).post(redirect_legacy_management).put(redirect_legacy_management).delete(redirect_legacy_management),
        )
        .with_state(state)
}

/// `/api/management/*` redirects to `/routes/api/management/*` (spec §6.2
/// "redirecting via 307"), preserving method and body for the client's
/// retried request.
async fn redirect_legacy_management(
    axum::extract::State(_state): axum::extract::State<AppState>,
    axum::extract::Path(rest): axum::extract::Path<String>,
    uri: axum::http::Uri,
) -> axum::response::Redirect {
    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    axum::response::Redirect::temporary(&format!("/routes/api/management/{rest}{query}"))
}
