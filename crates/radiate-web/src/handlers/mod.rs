//! HTTP处理器

pub mod ct;
pub mod datasets;
pub mod dose;
pub mod patients;
pub mod plans;
pub mod roi;
pub mod tutorial;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use radiate_core::{CtScan, Patient, TpsError};
use serde_json::json;
use std::sync::Arc;

/// 存活检查
pub async fn test_route() -> &'static str {
    "Server is working!"
}

/// 健康检查处理器
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "dose_engine": state.engine.as_ref().map(|e| e.name().to_string()),
    }))
}

/// `/patients` 本身不提供操作
pub async fn patients_root() -> impl IntoResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "message": "Use /patients/create to create and /patients/load to list patients"
        })),
    )
}

/// 解析 JSON 请求体，格式错误映射为 400
pub(crate) fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload.map(|Json(value)| value).map_err(ApiError::from)
}

pub(crate) async fn require_patient(state: &AppState, patient_id: &str) -> ApiResult<Patient> {
    state
        .queries()
        .get_patient(patient_id)
        .await?
        .ok_or_else(|| TpsError::not_found(format!("Patient with ID {} not found", patient_id)).into())
}

pub(crate) async fn require_ct_scan(state: &AppState, ct_scan_id: i64) -> ApiResult<CtScan> {
    state
        .queries()
        .get_ct_scan(ct_scan_id)
        .await?
        .ok_or_else(|| TpsError::not_found(format!("CT scan with ID {} not found", ct_scan_id)).into())
}

/// 非空字符串字段
pub(crate) fn required(value: Option<String>, message: &str) -> ApiResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| TpsError::validation(message).into())
}
