//! 剂量计算与结果查询

use super::ct::dataset_dir;
use super::plans::{insert_plan, require_plan, CreatePlanRequest};
use super::require_ct_scan;
use crate::error::ApiResult;
use crate::state::AppState;
use crate::static_files::file_response;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use radiate_core::{DoseResult, SliceView, TpsError, TreatmentPlan};
use radiate_database::{CompletedDose, ResultFilter};
use radiate_dose::dvh::DEFAULT_BINS;
use radiate_dose::{BeamSetup, DoseEngine, DoseRequest, Dvh};
use radiate_imaging::render::render_overlay;
use radiate_imaging::{Grid, Volume};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// `plan_id` 指定已有计划，否则按其余字段新建计划
#[derive(Debug, Deserialize)]
pub struct ComputeDoseRequest {
    pub plan_id: Option<i64>,
    #[serde(flatten)]
    pub plan: CreatePlanRequest,
}

#[derive(Debug, Deserialize)]
pub struct ResultQueryParams {
    pub plan_id: Option<i64>,
    pub patient_id: Option<String>,
    pub ct_scan_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ImageQueryParams {
    pub image: Option<String>,
}

pub async fn compute_dose(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ComputeDoseRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let request = super::body(payload)?;
    let engine = state.require_engine()?;

    let plan = match request.plan_id {
        Some(plan_id) => require_plan(&state, plan_id).await?,
        None => insert_plan(&state, request.plan).await?,
    };
    let result = run_dose_computation(&state, engine, &plan).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Dose computation completed",
        "result": result,
    })))
}

/// 计算计划剂量并登记结果；计算失败时结果标记为 `failed`
pub(crate) async fn run_dose_computation(
    state: &AppState,
    engine: Arc<dyn DoseEngine>,
    plan: &TreatmentPlan,
) -> ApiResult<DoseResult> {
    let ct_scan = require_ct_scan(state, plan.ct_scan_id).await?;
    let dataset = state.load_dataset(&dataset_dir(&ct_scan)?).await?;
    let ct = dataset
        .ct
        .as_ref()
        .map(|ct| ct.volume.clone())
        .ok_or_else(|| TpsError::validation("CT image not found in dataset"))?;

    let target = target_mask(state, plan, &dataset, ct.grid()).await;
    let queries = state.queries();
    let record = queries
        .create_dose_result(plan.id, ct_scan.id, plan.target_roi_id)
        .await?;
    info!(
        "Computing dose for plan {} with the {} engine (result {})",
        plan.id,
        engine.name(),
        record.id
    );

    match compute_and_store(state, engine.as_ref(), plan, record.id, ct, target).await {
        Ok(completed) => {
            let result = queries.complete_dose_result(record.id, &completed).await?;
            info!("Dose computation for plan {} completed", plan.id);
            Ok(result)
        }
        Err(e) => {
            let message = e.to_string();
            if let Err(mark) = queries.fail_dose_result(record.id, &message).await {
                warn!("Failed to mark dose result {} as failed: {}", record.id, mark);
            }
            Err(e.into())
        }
    }
}

/// 计划靶区 ROI 在 CT 网格上的掩膜，缺失时不做 DVH
async fn target_mask(
    state: &AppState,
    plan: &TreatmentPlan,
    dataset: &radiate_imaging::Dataset,
    grid: &Grid,
) -> Option<(String, Arc<Volume<bool>>)> {
    let roi_id = plan.target_roi_id?;
    let roi = match state.queries().get_roi(roi_id).await {
        Ok(Some(roi)) => roi,
        Ok(None) => {
            warn!("Target ROI {} of plan {} no longer exists", roi_id, plan.id);
            return None;
        }
        Err(e) => {
            warn!("Could not load target ROI {}: {}", roi_id, e);
            return None;
        }
    };
    let structure = match dataset.structures.as_ref().and_then(|s| s.find(&roi.name)) {
        Some(structure) => structure.clone(),
        None => {
            warn!("No contour named {} in the dataset of plan {}", roi.name, plan.id);
            return None;
        }
    };

    let grid = *grid;
    match tokio::task::spawn_blocking(move || structure.rasterize(&grid)).await {
        Ok(mask) if mask.count() > 0 => Some((roi.name, Arc::new(mask))),
        Ok(_) => {
            warn!("Contour {} does not cover any CT voxel", roi.name);
            None
        }
        Err(e) => {
            warn!("Rasterization of {} failed: {}", roi.name, e);
            None
        }
    }
}

async fn compute_and_store(
    state: &AppState,
    engine: &dyn DoseEngine,
    plan: &TreatmentPlan,
    result_id: i64,
    ct: Arc<Volume<f32>>,
    target: Option<(String, Arc<Volume<bool>>)>,
) -> radiate_core::Result<CompletedDose> {
    let request = DoseRequest {
        ct: ct.clone(),
        target: target.as_ref().map(|(_, mask)| mask.clone()),
        beams: BeamSetup::from_plan(plan, state.config.dose.nb_primaries),
    };
    let dose = engine.compute(&request).await?;
    let dose = Arc::new(on_grid(dose, *ct.grid()).await?);

    let mut completed = CompletedDose::default();
    match &target {
        Some((name, mask)) => {
            match score_dvh(name.clone(), dose.clone(), mask.clone(), state.config.dose.scoring_spacing).await {
                Ok(dvh) => {
                    let data = dvh.histogram(DEFAULT_BINS);
                    completed.d95 = Some(dvh.d95());
                    completed.d5 = Some(dvh.d5());
                    completed.mean_dose = Some(dvh.mean());
                    completed.max_dose = Some(dvh.max());
                    match state.storage.save_dvh(plan.id, result_id, &data).await {
                        Ok(path) => completed.dvh_file_path = Some(path.to_string_lossy().into_owned()),
                        Err(e) => warn!("Failed to save DVH of plan {}: {}", plan.id, e),
                    }
                    completed.dvh_data = Some(data);
                }
                Err(e) => warn!("DVH of plan {} skipped: {}", plan.id, e),
            }
        }
        None => {
            completed.max_dose = dose.min_max().map(|(_, max)| max as f64);
        }
    }

    let dose_path = state.storage.save_dose(plan.id, result_id, &dose).await?;
    completed.dose_file_path = Some(dose_path.to_string_lossy().into_owned());
    state.doses.insert(plan.ct_scan_id, dose.clone()).await;

    let z = ct.grid().shape[2] / 2;
    let mask = target.map(|(_, mask)| mask);
    match render_png(ct, dose, mask, z).await {
        Ok(png) => match state.storage.save_image(plan.id, result_id, &png).await {
            Ok(path) => completed.visualization_image_path = Some(path.to_string_lossy().into_owned()),
            Err(e) => warn!("Failed to save dose image of plan {}: {}", plan.id, e),
        },
        Err(e) => warn!("Failed to render dose image of plan {}: {}", plan.id, e),
    }

    Ok(completed)
}

/// 剂量不在 CT 网格上时线性重采样
async fn on_grid(dose: Volume<f32>, grid: Grid) -> radiate_core::Result<Volume<f32>> {
    if *dose.grid() == grid {
        return Ok(dose);
    }
    debug!("Resampling dose {:?} onto CT grid {:?}", dose.shape(), grid.shape);
    tokio::task::spawn_blocking(move || dose.resample_linear(&grid, 0.0))
        .await
        .map_err(|e| TpsError::Internal(format!("resampling task failed: {}", e)))
}

/// 在评分网格上统计 DVH
pub(crate) async fn score_dvh(
    name: String,
    dose: Arc<Volume<f32>>,
    mask: Arc<Volume<bool>>,
    spacing: [f64; 3],
) -> radiate_core::Result<Dvh> {
    tokio::task::spawn_blocking(move || {
        let scoring = mask.grid().with_spacing(spacing);
        let mask = mask.resample_nearest(&scoring, false);
        let dose = dose.resample_linear(&scoring, 0.0);
        Dvh::compute(name, &dose, &mask)
    })
    .await
    .map_err(|e| TpsError::Internal(format!("DVH task failed: {}", e)))?
}

/// 横断面 `z` 层的 CT + 剂量叠加图
pub(crate) async fn render_png(
    ct: Arc<Volume<f32>>,
    dose: Arc<Volume<f32>>,
    mask: Option<Arc<Volume<bool>>>,
    z: usize,
) -> radiate_core::Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        let ct_slice = ct.slice(SliceView::Axial, z)?;
        let dose_slice = dose.slice(SliceView::Axial, z)?;
        let mask_slice = mask.map(|m| m.slice(SliceView::Axial, z)).transpose()?;
        render_overlay(&ct_slice, Some(&dose_slice), mask_slice.as_ref())
    })
    .await
    .map_err(|e| TpsError::Internal(format!("render task failed: {}", e)))?
}

/// CT 网格上最近一次完成的剂量，优先取缓存
pub(crate) async fn stored_dose_on_grid(
    state: &AppState,
    ct_id: i64,
    grid: &Grid,
) -> radiate_core::Result<Option<Arc<Volume<f32>>>> {
    if let Some(dose) = state.doses.get(&ct_id).await {
        if dose.grid() == grid {
            return Ok(Some(dose));
        }
    }

    let result = match state.queries().latest_completed_dose_result(ct_id).await? {
        Some(result) => result,
        None => return Ok(None),
    };
    let path = match result.dose_file_path.as_deref() {
        Some(path) if tokio::fs::metadata(path).await.is_ok() => std::path::PathBuf::from(path),
        Some(path) => {
            warn!("Dose file {} of result {} is missing", path, result.id);
            return Ok(None);
        }
        None => return Ok(None),
    };

    let dose = state.storage.load_dose(&path).await?;
    let dose = on_grid(dose, *grid).await?;
    info!("Loaded and cached dose of CT {} from {:?}", ct_id, path);
    Ok(Some(state.doses.insert(ct_id, Arc::new(dose)).await))
}

/// 剂量结果列表，过滤优先级 plan_id > patient_id > ct_scan_id
pub async fn list_results(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ResultQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let filter = match (params.plan_id, params.patient_id, params.ct_scan_id) {
        (Some(plan_id), _, _) => ResultFilter::Plan(plan_id),
        (None, Some(patient_id), _) => ResultFilter::Patient(patient_id),
        (None, None, Some(ct_scan_id)) => ResultFilter::CtScan(ct_scan_id),
        (None, None, None) => ResultFilter::All,
    };
    let results = state.queries().list_dose_results(&filter).await?;

    Ok(Json(json!({
        "success": true,
        "count": results.len(),
        "results": results,
    })))
}

/// 输出目录中的图像，默认 `SimpleDose.png`
pub async fn get_image(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ImageQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let name = params.image.unwrap_or_else(|| "SimpleDose.png".to_string());
    let path = state.storage.resolve_output(&name).await?;
    Ok(file_response(&path).await?)
}
