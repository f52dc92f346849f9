//! 合成体模上的剂量计算演示

use super::dose::{render_png, score_dvh};
use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Json};
use radiate_core::{PlanType, SliceView, TpsError};
use radiate_dose::dvh::DEFAULT_BINS;
use radiate_dose::{BeamSetup, DoseRequest};
use radiate_imaging::render::{contour_outline, render_overlay};
use radiate_imaging::Phantom;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_SIZE: usize = 150;
const MIN_SIZE: usize = 10;
const MAX_SIZE: usize = 300;

#[derive(Debug, Deserialize)]
pub struct TutorialParams {
    pub size: Option<usize>,
}

/// 固定的三野质子射野
fn tutorial_beams(nb_primaries: f64) -> BeamSetup {
    BeamSetup {
        plan_type: PlanType::Proton,
        beam_names: vec!["Beam1".to_string(), "Beam2".to_string(), "Beam3".to_string()],
        gantry_angles: vec![0.0, 90.0, 270.0],
        couch_angles: vec![0.0, 0.0, 0.0],
        spot_spacing: 5.0,
        layer_spacing: 5.0,
        target_margin: 5.0,
        nb_primaries,
    }
}

/// 返回的靶区切片形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaskStyle {
    /// 实心掩膜
    Filled,
    /// 二值轮廓，供前端绘制等值线
    Outline,
}

/// 体模计算剂量，输出 `SimpleCT.png`、`SimpleDose.png` 及靶区中心层的切片与 DVH
pub async fn compute_dose(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TutorialParams>,
) -> ApiResult<impl IntoResponse> {
    run_tutorial(&state, params, MaskStyle::Filled).await
}

/// 同 [`compute_dose`]，`mask_slice` 为靶区轮廓
pub async fn plotly_compute_dose(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TutorialParams>,
) -> ApiResult<impl IntoResponse> {
    run_tutorial(&state, params, MaskStyle::Outline).await
}

async fn run_tutorial(
    state: &AppState,
    params: TutorialParams,
    style: MaskStyle,
) -> ApiResult<Json<serde_json::Value>> {
    let engine = state.require_engine()?;
    let size = params.size.unwrap_or(DEFAULT_SIZE).clamp(MIN_SIZE, MAX_SIZE);

    let phantom = tokio::task::spawn_blocking(move || Phantom::build(size))
        .await
        .map_err(|e| TpsError::Internal(format!("phantom task failed: {}", e)))?;
    let ct = Arc::new(phantom.ct);
    let target = Arc::new(phantom.target);

    // 靶区质心所在横断面
    let z = target
        .center_of_mass()
        .and_then(|com| ct.grid().voxel_index(com))
        .map(|[_, _, z]| z)
        .unwrap_or(size / 2);

    let ct_slice = ct.slice(SliceView::Axial, z)?;
    let mask_slice = target.slice(SliceView::Axial, z)?;
    match render_overlay(&ct_slice, None, Some(&mask_slice)) {
        Ok(png) => {
            if let Err(e) = state.storage.save_named_image("SimpleCT.png", &png).await {
                warn!("Failed to save SimpleCT.png: {}", e);
            }
        }
        Err(e) => warn!("Failed to render phantom CT: {}", e),
    }

    let request = DoseRequest {
        ct: ct.clone(),
        target: Some(target.clone()),
        beams: tutorial_beams(state.config.dose.nb_primaries),
    };
    let dose = engine.compute(&request).await?;
    let dose = if dose.grid() == ct.grid() {
        Arc::new(dose)
    } else {
        let grid = *ct.grid();
        Arc::new(
            tokio::task::spawn_blocking(move || dose.resample_linear(&grid, 0.0))
                .await
                .map_err(|e| TpsError::Internal(format!("resampling task failed: {}", e)))?,
        )
    };

    let dvh = score_dvh(
        phantom.target_name,
        dose.clone(),
        target.clone(),
        state.config.dose.scoring_spacing,
    )
    .await?;
    info!(
        "Tutorial dose computed on a {}^3 phantom: D95 = {:.2} Gy, D5 = {:.2} Gy, D5 - D95 = {:.2} Gy",
        size,
        dvh.d95(),
        dvh.d5(),
        dvh.d5() - dvh.d95()
    );

    let dose_slice = dose.slice(SliceView::Axial, z)?;
    let mask_out = match style {
        MaskStyle::Filled => mask_slice,
        MaskStyle::Outline => contour_outline(&mask_slice),
    };
    let png = render_png(ct.clone(), dose.clone(), Some(target.clone()), z).await?;
    let image = state.storage.save_named_image("SimpleDose.png", &png).await?;

    Ok(Json(json!({
        "message": "Dose Computation Completed!",
        "image": image.to_string_lossy(),
        "slice_num": z,
        "ct_slice": ct_slice.rows,
        "mask_slice": mask_out.map(u8::from).rows,
        "dose_slice": dose_slice.rows,
        "dvh": dvh.histogram(DEFAULT_BINS),
        "d95": dvh.d95(),
        "d5": dvh.d5(),
    })))
}
