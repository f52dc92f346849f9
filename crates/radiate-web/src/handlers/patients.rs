//! 患者管理

use super::{body, require_patient, required};
use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use radiate_core::utils::parse_birth_date;
use radiate_core::{Sex, TpsError};
use radiate_database::NewPatient;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct CreatePatientRequest {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "birthDate")]
    pub birth_date: Option<String>,
    pub sex: Option<String>,
}

fn parse_sex(value: &str) -> ApiResult<Sex> {
    serde_json::from_value(Value::String(value.to_string()))
        .map_err(|_| TpsError::validation(format!("Invalid sex: {}. Use M, F or O", value)).into())
}

/// 创建患者，同时写入 JSON 镜像
pub async fn create_patient(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreatePatientRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let request = body(payload)?;
    let id = required(request.id, "Patient ID is required")?;
    let name = required(request.name, "Patient name is required")?;

    let queries = state.queries();
    if queries.get_patient(&id).await?.is_some() {
        return Err(TpsError::validation(format!("Patient with ID {} already exists", id)).into());
    }

    let birth_date = match request.birth_date.as_deref().filter(|d| !d.is_empty()) {
        Some(raw) => Some(parse_birth_date(raw)?),
        None => None,
    };
    let sex = match request.sex.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_sex(raw)?),
        None => None,
    };

    let patient = queries
        .create_patient(&NewPatient {
            id,
            name,
            birth_date,
            sex,
        })
        .await?;
    info!("Created patient {}", patient.id);

    if let Err(e) = state.storage.write_patient_json(&patient).await {
        warn!("Failed to mirror patient {} to JSON: {}", patient.id, e);
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!("Patient {} saved.", patient.name),
            "patient": patient,
        })),
    ))
}

/// 数据库中的患者加上仅存在于 JSON 镜像中的患者
pub async fn load_patients(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let patients = state.queries().list_patients().await?;
    let known: HashSet<String> = patients.iter().map(|p| p.id.clone()).collect();

    let mut list = patients
        .into_iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<Value>, _>>()
        .map_err(TpsError::from)?;

    match state.storage.read_patient_jsons().await {
        Ok(mirrored) => list.extend(mirrored.into_iter().filter(|p| {
            p.get("id")
                .and_then(Value::as_str)
                .map_or(false, |id| !known.contains(id))
        })),
        Err(e) => warn!("Failed to read patient JSON mirror: {}", e),
    }

    Ok(Json(Value::Array(list)))
}

pub async fn get_patient(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let patient = require_patient(&state, &patient_id).await?;
    Ok(Json(patient))
}

/// 删除患者及其全部数据
pub async fn delete_patient(
    State(state): State<Arc<AppState>>,
    Path(patient_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let patient = require_patient(&state, &patient_id).await?;
    let queries = state.queries();
    let ct_scans = queries.list_ct_scans(Some(&patient.id)).await?;

    queries.delete_patient(&patient.id).await?;
    for ct in &ct_scans {
        state.doses.invalidate(&ct.id).await;
    }
    if let Err(e) = state.storage.remove_patient_json(&patient.id).await {
        warn!("Failed to remove JSON mirror of patient {}: {}", patient.id, e);
    }
    info!("Deleted patient {} ({} CT scans)", patient.id, ct_scans.len());

    Ok(Json(json!({
        "success": true,
        "message": format!("Patient {} deleted successfully", patient.name),
    })))
}
