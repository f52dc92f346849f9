//! CT 管理与切片查看

use super::dose::stored_dose_on_grid;
use super::{body, require_ct_scan, require_patient, required};
use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use radiate_core::utils::classify_structure_name;
use radiate_core::{CtScan, Roi, SliceView, TpsError};
use radiate_database::{NewCtScan, NewRoi};
use radiate_imaging::{Dataset, Grid, Slice2D, Structure};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct CreateCtRequest {
    pub patient_id: Option<String>,
    pub dataset_name: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CtQueryParams {
    pub patient_id: Option<String>,
    pub ct_scan_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SliceQueryParams {
    pub view: Option<String>,
    pub roi_id: Option<i64>,
}

/// 从数据集登记 CT
pub async fn create_ct(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateCtRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let request = body(payload)?;
    let patient_id = required(request.patient_id, "patient_id is required")?;
    let patient = require_patient(&state, &patient_id).await?;
    let dataset_name = required(request.dataset_name, "Either dataset_name or DICOM files required")?;
    let ct_name = request
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "CT Scan".to_string());

    state.require_loader()?;
    let dir = state.dataset_path(&dataset_name)?;
    if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(TpsError::not_found(format!("Dataset {} not found", dataset_name)).into());
    }

    let dataset = state.load_dataset(&dir).await?;
    let ct = dataset
        .ct
        .as_ref()
        .ok_or_else(|| TpsError::validation("CT image not found in dataset"))?;
    let grid = *ct.volume.grid();

    let ct_scan = state
        .queries()
        .create_ct_scan(&NewCtScan {
            patient_id: patient.id,
            name: Some(ct_name.clone()),
            file_path: Some(dir.to_string_lossy().into_owned()),
            dataset_name: Some(dataset_name),
            slice_count: Some(grid.shape[2] as i64),
            spacing: Some(grid.spacing),
            origin: Some(grid.origin),
            grid_size: Some(grid.shape),
        })
        .await?;
    info!("Registered CT scan {} from {:?}", ct_scan.id, dir);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!("CT scan '{}' uploaded successfully", ct_name),
            "ct_scan": ct_scan,
        })),
    ))
}

pub async fn list_ct(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CtQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let ct_scans = match params.ct_scan_id {
        Some(id) => vec![require_ct_scan(&state, id).await?],
        None => state.queries().list_ct_scans(params.patient_id.as_deref()).await?,
    };

    Ok(Json(json!({
        "success": true,
        "count": ct_scans.len(),
        "ct_scans": ct_scans,
    })))
}

/// 删除 CT，级联删除其 ROI、计划与剂量结果
pub async fn delete_ct(
    State(state): State<Arc<AppState>>,
    Path(ct_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let ct_scan = require_ct_scan(&state, ct_id).await?;
    state.queries().delete_ct_scan(ct_id).await?;
    state.doses.invalidate(&ct_id).await;
    info!("Deleted CT scan {}", ct_id);

    Ok(Json(json!({
        "success": true,
        "message": format!("CT scan '{}' deleted successfully", ct_scan.name.unwrap_or_default()),
    })))
}

/// 指定方向的 CT 切片，附带 ROI 掩膜与剂量切片
pub async fn get_slice(
    State(state): State<Arc<AppState>>,
    Path((ct_id, slice_num)): Path<(i64, usize)>,
    Query(params): Query<SliceQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let view = SliceView::parse(params.view.as_deref());
    let ct_scan = require_ct_scan(&state, ct_id).await?;
    let dir = dataset_dir(&ct_scan)?;

    let dataset = state.load_dataset(&dir).await?;
    let ct = dataset
        .ct
        .as_ref()
        .ok_or_else(|| TpsError::validation("CT image not found or invalid"))?;
    let grid = *ct.volume.grid();
    let ct_slice = ct.volume.slice(view, slice_num)?;
    debug!(
        "Extracted {} slice {}/{} of CT {}",
        view.as_str(),
        slice_num,
        grid.slice_count(view),
        ct_id
    );

    let rois = match ensure_rois(&state, &ct_scan, &dataset).await {
        Ok(rois) => rois,
        Err(e) => {
            warn!("Could not load ROIs for CT {}: {}", ct_id, e);
            Vec::new()
        }
    };

    let (mask_slice, roi_contours) =
        match mask_for_slice(&dataset, &rois, params.roi_id, &grid, view, slice_num).await {
            Ok(Some((roi, mask))) => (Some(mask), vec![roi_summary(&roi)]),
            Ok(None) => (None, Vec::new()),
            Err(e) => {
                warn!("Could not extract ROI mask for CT {}: {}", ct_id, e);
                (None, Vec::new())
            }
        };

    let dose_slice = match dose_for_slice(&state, &dataset, ct_id, &grid, view, slice_num).await {
        Ok(slice) => slice,
        Err(e) => {
            warn!("Could not load dose for CT {}: {}", ct_id, e);
            None
        }
    };

    Ok(Json(json!({
        "success": true,
        "ct_slice": ct_slice.rows,
        "mask_slice": mask_slice.map(|m| m.rows),
        "dose_slice": dose_slice.map(|d| d.rows),
        "roi_contours": roi_contours,
        "slice_num": slice_num,
        "view": view.as_str(),
        "total_slices": grid.slice_count(view),
        "dimensions": { "width": ct_slice.width, "height": ct_slice.height },
    })))
}

/// 数据集登记的 CT 所在目录
pub(crate) fn dataset_dir(ct_scan: &CtScan) -> radiate_core::Result<PathBuf> {
    if ct_scan.dataset_name.is_none() {
        return Err(TpsError::validation("CT scan must be loaded from dataset"));
    }
    ct_scan
        .file_path
        .as_ref()
        .map(PathBuf::from)
        .ok_or_else(|| TpsError::not_found(format!("Dataset path not found for CT scan {}", ct_scan.id)))
}

/// CT 尚无 ROI 记录时按结构集自动创建
async fn ensure_rois(state: &AppState, ct_scan: &CtScan, dataset: &Dataset) -> radiate_core::Result<Vec<Roi>> {
    let queries = state.queries();
    let rois = queries.list_rois_for_ct_scan(ct_scan.id).await?;
    let structures = match &dataset.structures {
        Some(set) if rois.is_empty() && !set.structures.is_empty() => set,
        _ => return Ok(rois),
    };

    for structure in &structures.structures {
        let (roi_type, color) = classify_structure_name(&structure.name);
        queries
            .create_roi(&NewRoi {
                patient_id: ct_scan.patient_id.clone(),
                ct_scan_id: Some(ct_scan.id),
                name: structure.name.clone(),
                roi_type: Some(roi_type.to_string()),
                color: Some(color.to_string()),
                mask_file_path: None,
            })
            .await?;
    }
    let rois = queries.list_rois_for_ct_scan(ct_scan.id).await?;
    info!("Auto-created {} ROIs for CT {} from RTSTRUCT", rois.len(), ct_scan.id);
    Ok(rois)
}

/// 请求的 ROI，或第一个在结构集中有轮廓的 ROI
fn select_roi<'a>(
    dataset: &'a Dataset,
    rois: &'a [Roi],
    roi_id: Option<i64>,
) -> Option<(&'a Roi, &'a Structure)> {
    let structures = dataset.structures.as_ref()?;
    match roi_id {
        Some(id) => {
            let roi = rois.iter().find(|r| r.id == id)?;
            structures.find(&roi.name).map(|s| (roi, s))
        }
        None => rois
            .iter()
            .find_map(|roi| structures.find(&roi.name).map(|s| (roi, s))),
    }
}

/// 只栅格化当前切片所在的单层网格
async fn mask_for_slice(
    dataset: &Dataset,
    rois: &[Roi],
    roi_id: Option<i64>,
    grid: &Grid,
    view: SliceView,
    index: usize,
) -> radiate_core::Result<Option<(Roi, Slice2D<u8>)>> {
    let (roi, structure) = match select_roi(dataset, rois, roi_id) {
        Some(found) => found,
        None => return Ok(None),
    };

    let structure = structure.clone();
    let plane = grid.plane(view, index);
    let mask = tokio::task::spawn_blocking(move || structure.rasterize(&plane))
        .await
        .map_err(|e| TpsError::Internal(format!("rasterization task failed: {}", e)))?;
    let slice = mask.slice(view, 0)?.map(u8::from);
    Ok(Some((roi.clone(), slice)))
}

/// 数据集自带的 RTDOSE 优先，其次为最近一次完成的剂量结果
async fn dose_for_slice(
    state: &AppState,
    dataset: &Dataset,
    ct_id: i64,
    grid: &Grid,
    view: SliceView,
    index: usize,
) -> radiate_core::Result<Option<Slice2D<f32>>> {
    if let Some(dose) = &dataset.dose {
        let plane = grid.plane(view, index);
        return Ok(Some(dose.resample_linear(&plane, 0.0).slice(view, 0)?));
    }

    match stored_dose_on_grid(state, ct_id, grid).await? {
        Some(dose) => Ok(Some(dose.slice(view, index)?)),
        None => Ok(None),
    }
}

fn roi_summary(roi: &Roi) -> Value {
    json!({ "id": roi.id, "name": roi.name, "color": roi.color })
}
