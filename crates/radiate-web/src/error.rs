//! HTTP 错误映射

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use radiate_core::TpsError;
use serde_json::json;
use tracing::{error, warn};

/// 处理器错误，响应体为 `{"error": "<message>"}`
#[derive(Debug)]
pub struct ApiError(pub TpsError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TpsError::Validation(_) => StatusCode::BAD_REQUEST,
            TpsError::NotFound(_) => StatusCode::NOT_FOUND,
            TpsError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TpsError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TpsError> for ApiError {
    fn from(err: TpsError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(TpsError::validation(rejection.body_text()))
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError(TpsError::validation(format!("Invalid multipart upload: {}", err)))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.0.to_string();
        if status.is_server_error() {
            error!("Request failed ({}): {}", status.as_u16(), message);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), message);
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}
