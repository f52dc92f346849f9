//! 数据集浏览与 DICOM 上传

use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::{Multipart, Path, State};
use axum::response::{IntoResponse, Json};
use radiate_core::TpsError;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// 上传文件的表单字段名
const UPLOAD_FIELD: &str = "dicom_folder";
/// 上传目录下的暂存子目录
const UPLOAD_DIR: &str = "dicom_temp";

pub async fn list_datasets(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let root = state.config.storage.datasets_dir.clone();
    let datasets = tokio::task::spawn_blocking(move || radiate_imaging::list_datasets(&root))
        .await
        .map_err(|e| TpsError::Internal(format!("dataset listing failed: {}", e)))??;

    Ok(Json(json!({ "datasets": datasets })))
}

/// 加载数据集，要求同时包含 CT 与 RTSTRUCT
pub async fn load_dataset_info(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let dir = state.dataset_path(&name)?;
    let dataset = state.load_dataset(&dir).await?;
    if dataset.ct.is_none() || dataset.structures.is_none() {
        return Err(TpsError::validation("Dataset missing RT Struct or CT").into());
    }

    Ok(Json(json!({
        "dataset": name,
        "roi_names": dataset.roi_names(),
        "message": format!("{} loaded successfully!", name),
    })))
}

pub async fn dataset_rois(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let dir = state.dataset_path(&name)?;
    let dataset = state.load_dataset(&dir).await?;
    if dataset.structures.is_none() {
        return Err(TpsError::validation("RT Struct not found in dataset").into());
    }

    Ok(Json(json!({ "roi_names": dataset.roi_names() })))
}

/// 接收一组 DICOM 文件，替换暂存目录内容后重新加载
pub async fn upload_dicom(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let dir = state.storage.upload_dir().join(UPLOAD_DIR);
    match tokio::fs::remove_dir_all(&dir).await {
        Ok(()) => debug!("Cleared previous upload in {:?}", dir),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(TpsError::from(e).into()),
    }

    let mut stored = 0usize;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        // 浏览器上传文件夹时文件名带相对路径，只保留最后一级
        let file_name = field
            .file_name()
            .and_then(|name| name.rsplit(['/', '\\']).next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("upload_{}.dcm", stored));
        let data = field.bytes().await?;
        state
            .storage
            .store_upload(&format!("{}/{}", UPLOAD_DIR, file_name), &data)
            .await?;
        stored += 1;
    }
    if stored == 0 {
        return Err(TpsError::validation(format!("No files found in field {}", UPLOAD_FIELD)).into());
    }

    state.forget_dataset(&dir).await;
    let dataset = state.load_dataset(&dir).await?;
    info!("Received {} uploaded DICOM files", stored);

    Ok(Json(json!({ "roi_names": dataset.roi_names() })))
}
