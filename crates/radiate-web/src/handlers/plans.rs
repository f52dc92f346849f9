//! 治疗计划管理

use super::{body, require_ct_scan, require_patient, required};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use radiate_core::{PlanType, TpsError, TreatmentPlan};
use radiate_database::{NewTreatmentPlan, PlanUpdate};
use radiate_dose::validate_beams;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// 新建计划的参数，未给出的字段取默认三野质子计划
#[derive(Debug, Default, Deserialize)]
pub struct CreatePlanRequest {
    pub patient_id: Option<String>,
    pub ct_scan_id: Option<i64>,
    pub plan_name: Option<String>,
    pub plan_type: Option<String>,
    pub beam_names: Option<Vec<String>>,
    pub gantry_angles: Option<Vec<f64>>,
    pub couch_angles: Option<Vec<f64>>,
    pub spot_spacing: Option<f64>,
    pub layer_spacing: Option<f64>,
    pub target_margin: Option<f64>,
    pub target_roi_id: Option<i64>,
}

/// 局部更新，`target_roi_id: null` 清空靶区
#[derive(Debug, Default, Deserialize)]
pub struct UpdatePlanRequest {
    pub plan_name: Option<String>,
    pub plan_type: Option<String>,
    pub beam_names: Option<Vec<String>>,
    pub gantry_angles: Option<Vec<f64>>,
    pub couch_angles: Option<Vec<f64>>,
    pub spot_spacing: Option<f64>,
    pub layer_spacing: Option<f64>,
    pub target_margin: Option<f64>,
    #[serde(default, deserialize_with = "present")]
    pub target_roi_id: Option<Option<i64>>,
}

/// 区分字段缺失与显式 `null`
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct PlanQueryParams {
    pub patient_id: Option<String>,
    pub ct_scan_id: Option<i64>,
}

fn check_geometry(
    names: &[String],
    gantry: &[f64],
    couch: &[f64],
    spot: f64,
    layer: f64,
    margin: f64,
) -> ApiResult<()> {
    validate_beams(names, gantry, couch)?;
    if spot <= 0.0 || layer <= 0.0 || margin < 0.0 {
        return Err(TpsError::validation(
            "spot_spacing and layer_spacing must be positive, target_margin non-negative",
        )
        .into());
    }
    Ok(())
}

/// 靶区 ROI 必须存在且属于同一患者
async fn check_target_roi(state: &AppState, roi_id: i64, patient_id: &str) -> ApiResult<()> {
    let roi = state
        .queries()
        .get_roi(roi_id)
        .await?
        .ok_or_else(|| TpsError::not_found(format!("ROI with ID {} not found", roi_id)))?;
    if roi.patient_id != patient_id {
        return Err(TpsError::validation("Target ROI does not belong to this patient").into());
    }
    Ok(())
}

/// 校验参数并插入计划
pub(crate) async fn insert_plan(state: &AppState, request: CreatePlanRequest) -> ApiResult<TreatmentPlan> {
    let ct_scan_id = request
        .ct_scan_id
        .ok_or_else(|| ApiError(TpsError::validation("patient_id and ct_scan_id are required")))?;
    let patient_id = required(request.patient_id, "patient_id and ct_scan_id are required")?;
    let patient = require_patient(state, &patient_id).await?;
    let ct_scan = require_ct_scan(state, ct_scan_id).await?;
    if ct_scan.patient_id != patient.id {
        return Err(TpsError::validation("CT scan does not belong to this patient").into());
    }

    let mut plan = NewTreatmentPlan::with_defaults(patient.id, ct_scan.id);
    if let Some(name) = request.plan_name.filter(|n| !n.trim().is_empty()) {
        plan.plan_name = name;
    }
    if let Some(plan_type) = request.plan_type.as_deref() {
        plan.plan_type = PlanType::parse(plan_type);
    }
    if let Some(gantry) = request.gantry_angles {
        plan.beam_names = (1..=gantry.len()).map(|i| format!("Beam{}", i)).collect();
        plan.couch_angles = vec![0.0; gantry.len()];
        plan.gantry_angles = gantry;
    }
    if let Some(names) = request.beam_names {
        plan.beam_names = names;
    }
    if let Some(couch) = request.couch_angles {
        plan.couch_angles = couch;
    }
    plan.spot_spacing = request.spot_spacing.unwrap_or(plan.spot_spacing);
    plan.layer_spacing = request.layer_spacing.unwrap_or(plan.layer_spacing);
    plan.target_margin = request.target_margin.unwrap_or(plan.target_margin);
    plan.target_roi_id = request.target_roi_id;

    check_geometry(
        &plan.beam_names,
        &plan.gantry_angles,
        &plan.couch_angles,
        plan.spot_spacing,
        plan.layer_spacing,
        plan.target_margin,
    )?;
    if let Some(roi_id) = plan.target_roi_id {
        check_target_roi(state, roi_id, &plan.patient_id).await?;
    }

    let plan = state.queries().create_plan(&plan).await?;
    info!("Created plan {} ({}) for CT {}", plan.id, plan.plan_name, plan.ct_scan_id);
    Ok(plan)
}

pub(crate) async fn require_plan(state: &AppState, plan_id: i64) -> ApiResult<TreatmentPlan> {
    state
        .queries()
        .get_plan(plan_id)
        .await?
        .ok_or_else(|| TpsError::not_found(format!("Plan with ID {} not found", plan_id)).into())
}

pub async fn create_plan(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreatePlanRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let plan = insert_plan(&state, body(payload)?).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!("Plan '{}' saved successfully", plan.plan_name),
            "plan": plan,
        })),
    ))
}

pub async fn list_plans(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PlanQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let plans = state
        .queries()
        .list_plans(params.patient_id.as_deref(), params.ct_scan_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "count": plans.len(),
        "plans": plans,
    })))
}

/// 计划详情，附带其全部剂量结果
pub async fn get_plan(
    State(state): State<Arc<AppState>>,
    Path(plan_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let plan = require_plan(&state, plan_id).await?;
    let results = state.queries().list_dose_results_for_plan(plan_id).await?;

    let mut plan_json = serde_json::to_value(&plan).map_err(TpsError::from)?;
    plan_json["dose_results"] = serde_json::to_value(&results).map_err(TpsError::from)?;

    Ok(Json(json!({
        "success": true,
        "plan": plan_json,
    })))
}

pub async fn update_plan(
    State(state): State<Arc<AppState>>,
    Path(plan_id): Path<i64>,
    payload: Result<Json<UpdatePlanRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let request = body(payload)?;
    let mut plan = require_plan(&state, plan_id).await?;

    PlanUpdate {
        plan_name: request.plan_name.filter(|n| !n.trim().is_empty()),
        plan_type: request.plan_type.as_deref().map(PlanType::parse),
        beam_names: request.beam_names,
        gantry_angles: request.gantry_angles,
        couch_angles: request.couch_angles,
        spot_spacing: request.spot_spacing,
        layer_spacing: request.layer_spacing,
        target_margin: request.target_margin,
        target_roi_id: request.target_roi_id,
    }
    .apply(&mut plan);

    check_geometry(
        &plan.beam_names,
        &plan.gantry_angles,
        &plan.couch_angles,
        plan.spot_spacing,
        plan.layer_spacing,
        plan.target_margin,
    )?;
    if let Some(roi_id) = plan.target_roi_id {
        check_target_roi(&state, roi_id, &plan.patient_id).await?;
    }

    let plan = state.queries().update_plan(&plan).await?;
    info!("Updated plan {}", plan.id);

    Ok(Json(json!({
        "success": true,
        "message": format!("Plan '{}' updated successfully", plan.plan_name),
        "plan": plan,
    })))
}

/// 删除计划及其剂量结果
pub async fn delete_plan(
    State(state): State<Arc<AppState>>,
    Path(plan_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let plan = require_plan(&state, plan_id).await?;
    state.queries().delete_plan(plan_id).await?;
    state.doses.invalidate(&plan.ct_scan_id).await;
    info!("Deleted plan {}", plan_id);

    Ok(Json(json!({
        "success": true,
        "message": format!("Plan '{}' deleted successfully", plan.plan_name),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_distinguishes_null_from_missing() {
        let missing: UpdatePlanRequest = serde_json::from_str(r#"{"plan_name": "B"}"#).unwrap();
        assert_eq!(missing.target_roi_id, None);

        let cleared: UpdatePlanRequest = serde_json::from_str(r#"{"target_roi_id": null}"#).unwrap();
        assert_eq!(cleared.target_roi_id, Some(None));

        let set: UpdatePlanRequest = serde_json::from_str(r#"{"target_roi_id": 4}"#).unwrap();
        assert_eq!(set.target_roi_id, Some(Some(4)));
    }

    #[test]
    fn test_geometry_checks() {
        let names = vec!["A".to_string(), "B".to_string()];
        assert!(check_geometry(&names, &[0.0, 90.0], &[0.0, 0.0], 5.0, 5.0, 0.0).is_ok());
        assert!(check_geometry(&names, &[0.0], &[0.0, 0.0], 5.0, 5.0, 5.0).is_err());
        assert!(check_geometry(&names, &[0.0, 90.0], &[0.0, 0.0], 0.0, 5.0, 5.0).is_err());
        assert!(check_geometry(&[], &[], &[], 5.0, 5.0, 5.0).is_err());
    }
}
