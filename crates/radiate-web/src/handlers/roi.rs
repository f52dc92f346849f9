//! ROI 管理

use super::{body, require_ct_scan, require_patient, required};
use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use radiate_core::utils::{parse_color, TARGET_COLOR};
use radiate_core::TpsError;
use radiate_database::NewRoi;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct CreateRoiRequest {
    pub patient_id: Option<String>,
    pub ct_scan_id: Option<i64>,
    pub name: Option<String>,
    pub roi_type: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoiQueryParams {
    pub patient_id: Option<String>,
    pub ct_scan_id: Option<i64>,
}

pub async fn create_roi(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateRoiRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let request = body(payload)?;
    let patient_id = required(request.patient_id, "patient_id and name are required")?;
    let name = required(request.name, "patient_id and name are required")?;
    let patient = require_patient(&state, &patient_id).await?;

    if let Some(ct_scan_id) = request.ct_scan_id {
        let ct_scan = require_ct_scan(&state, ct_scan_id).await?;
        if ct_scan.patient_id != patient.id {
            return Err(TpsError::validation("CT scan does not belong to this patient").into());
        }
    }

    let color = request.color.unwrap_or_else(|| TARGET_COLOR.to_string());
    if parse_color(&color).is_none() {
        return Err(TpsError::validation(format!("Invalid color: {}. Use \"r,g,b\"", color)).into());
    }

    let roi = state
        .queries()
        .create_roi(&NewRoi {
            patient_id: patient.id,
            ct_scan_id: request.ct_scan_id,
            name,
            roi_type: Some(request.roi_type.unwrap_or_else(|| "Target".to_string())),
            color: Some(color),
            mask_file_path: None,
        })
        .await?;
    info!("Created ROI {} ({})", roi.id, roi.name);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!("ROI '{}' created successfully", roi.name),
            "roi": roi,
        })),
    ))
}

pub async fn list_rois(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RoiQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let rois = state
        .queries()
        .list_rois(params.patient_id.as_deref(), params.ct_scan_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "count": rois.len(),
        "rois": rois,
    })))
}

/// 删除 ROI，引用它的计划靶区与剂量结果置空
pub async fn delete_roi(
    State(state): State<Arc<AppState>>,
    Path(roi_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let queries = state.queries();
    let roi = queries
        .get_roi(roi_id)
        .await?
        .ok_or_else(|| TpsError::not_found(format!("ROI with ID {} not found", roi_id)))?;
    queries.delete_roi(roi_id).await?;
    info!("Deleted ROI {}", roi_id);

    Ok(Json(json!({
        "success": true,
        "message": format!("ROI '{}' deleted successfully", roi.name),
    })))
}
