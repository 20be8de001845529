use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gw_common::GatewayError;
use serde_json::json;

/// Wraps a crate-level [`GatewayError`] so it can be returned directly from
/// an axum handler (spec §7 "[ADD] Ambient error-handling stack"): the
/// status code comes from `ErrorKind::status()`, the body is the
/// `{"error": ..., "details": ...}` envelope. Internal errors are logged
/// here with their full detail and scrubbed before they reach the client.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, details = ?self.0.details, "internal error");
            return (
                status,
                Json(json!({ "error": "internal server error" })),
            )
                .into_response();
        }

        (status, Json(&self.0)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
