//! Maps [`CoreError`] onto HTTP status codes per spec.md §6's exit-code
//! table (2xx success; 400 domain; 401/403 auth; 404 absent; 409
//! conflict; 429 rate-limited; 5xx transient), and `anyhow::Error` from
//! the config/scheduler edges onto a generic 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use courtcard_core::error::CoreError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = match &self.0 {
            CoreError::Validation { .. } => StatusCode::BAD_REQUEST,
            CoreError::Auth { code, .. } if *code == "FORBIDDEN" => StatusCode::FORBIDDEN,
            CoreError::Auth { .. } => StatusCode::UNAUTHORIZED,
            CoreError::State { .. } => StatusCode::CONFLICT,
            CoreError::Integrity { .. } => StatusCode::OK,
            CoreError::Transient { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::DataBug { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            code,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
