//! 文件存储管理
//!
//! 剂量体数据以 `.npy` 保存，网格几何写入同名 `.json` 旁注文件。

use radiate_core::config::StorageConfig;
use radiate_core::utils::file_timestamp;
use radiate_core::{DvhData, Patient, Result, TpsError};
use radiate_imaging::{npy, Grid, Volume};
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// 缺少几何旁注时使用的剂量网格间距 (mm)
pub const DEFAULT_DOSE_SPACING: [f64; 3] = [0.468, 0.468, 1.0];
/// 缺少几何旁注时使用的剂量网格原点 (mm)
pub const DEFAULT_DOSE_ORIGIN: [f64; 3] = [-120.0, -120.0, -797.5];

/// 上传的 DICOM 文件存放的子目录
pub const DICOM_UPLOAD_DIR: &str = "dicom_temp";

/// 存储管理器
#[derive(Debug, Clone)]
pub struct StorageManager {
    upload_dir: PathBuf,
    output_dir: PathBuf,
    patient_dir: PathBuf,
}

impl StorageManager {
    pub fn new(upload_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, patient_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
            patient_dir: patient_dir.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.upload_dir, &config.output_dir, &config.patient_dir)
    }

    /// 创建存储目录
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.upload_dir, &self.output_dir, &self.patient_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 存储上传文件，`relative` 中的绝对路径与 `..` 会被剔除
    pub async fn store_upload(&self, relative: &str, data: &[u8]) -> Result<PathBuf> {
        let full_path = self.upload_dir.join(sanitize_relative(relative)?);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&full_path, data).await?;
        debug!("Stored upload {:?} ({} bytes)", full_path, data.len());
        Ok(full_path)
    }

    /// 读取上传目录下的文件
    pub async fn get_file(&self, relative: &str) -> Result<Vec<u8>> {
        let full_path = self.upload_dir.join(sanitize_relative(relative)?);
        let data = tokio::fs::read(full_path).await?;
        Ok(data)
    }

    // ========== 剂量体数据 ==========

    /// 保存剂量分布，返回 `.npy` 路径
    pub async fn save_dose(&self, plan_id: i64, result_id: i64, dose: &Volume<f32>) -> Result<PathBuf> {
        let path = self
            .output_dir
            .join(format!("dose_image_{}.npy", result_stem(plan_id, result_id)));
        self.write_dose(&path, dose).await?;
        Ok(path)
    }

    pub async fn write_dose(&self, path: &Path, dose: &Volume<f32>) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = npy::encode_f32(&dose.shape(), dose.data())?;
        tokio::fs::write(path, bytes).await?;
        tokio::fs::write(path.with_extension("json"), serde_json::to_vec_pretty(dose.grid())?).await?;
        info!("Saved dose volume {:?} to {:?}", dose.shape(), path);
        Ok(())
    }

    /// 读取剂量分布；旁注缺失时使用默认网格几何
    pub async fn load_dose(&self, path: &Path) -> Result<Volume<f32>> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            TpsError::Storage(format!("failed to read dose file {:?}: {}", path, e))
        })?;
        let array = npy::decode(&bytes)?;
        let shape: [usize; 3] = array.shape.as_slice().try_into().map_err(|_| {
            TpsError::Storage(format!("dose file {:?} is not 3-D: {:?}", path, array.shape))
        })?;

        let grid = match tokio::fs::read(path.with_extension("json")).await {
            Ok(raw) => {
                let grid: Grid = serde_json::from_slice(&raw)?;
                if grid.shape != shape {
                    return Err(TpsError::Storage(format!(
                        "dose sidecar shape {:?} does not match array shape {:?}",
                        grid.shape, shape
                    )));
                }
                grid
            }
            Err(_) => {
                warn!("No geometry sidecar for {:?}, using default dose grid", path);
                Grid::new(shape, DEFAULT_DOSE_SPACING, DEFAULT_DOSE_ORIGIN)
            }
        };
        Volume::new(grid, array.data)
    }

    /// 保存 DVH 曲线 JSON
    pub async fn save_dvh(&self, plan_id: i64, result_id: i64, dvh: &DvhData) -> Result<PathBuf> {
        let path = self
            .output_dir
            .join(format!("dvh_{}.json", result_stem(plan_id, result_id)));
        tokio::fs::create_dir_all(&self.output_dir).await?;
        tokio::fs::write(&path, serde_json::to_vec(dvh)?).await?;
        Ok(path)
    }

    // ========== 图像 ==========

    /// 保存计划的剂量可视化 PNG
    pub async fn save_image(&self, plan_id: i64, result_id: i64, png: &[u8]) -> Result<PathBuf> {
        self.save_named_image(&format!("dose_result_{}.png", result_stem(plan_id, result_id)), png)
            .await
    }

    pub async fn save_named_image(&self, name: &str, png: &[u8]) -> Result<PathBuf> {
        let path = self.output_dir.join(validate_file_name(name)?);
        tokio::fs::create_dir_all(&self.output_dir).await?;
        tokio::fs::write(&path, png).await?;
        debug!("Saved image {:?}", path);
        Ok(path)
    }

    /// 解析输出目录中的文件名，不存在或越界时返回 NotFound
    pub async fn resolve_output(&self, name: &str) -> Result<PathBuf> {
        let path = validate_file_name(name)
            .map(|n| self.output_dir.join(n))
            .map_err(|_| TpsError::not_found(format!("Image not found: {}", name)))?;
        if !tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
            return Err(TpsError::not_found(format!("Image not found: {}", name)));
        }
        Ok(path)
    }

    // ========== 患者 JSON 镜像 ==========

    /// 写入 `<patient_dir>/<id>.json`
    pub async fn write_patient_json(&self, patient: &Patient) -> Result<PathBuf> {
        let path = self
            .patient_dir
            .join(format!("{}.json", validate_file_name(&patient.id)?));
        let doc = json!({
            "name": patient.name,
            "id": patient.id,
            "birthDate": patient.birth_date.map(|d| d.format("%Y-%m-%d").to_string()),
            "sex": patient.sex.map(|s| s.as_code()),
        });
        tokio::fs::create_dir_all(&self.patient_dir).await?;
        tokio::fs::write(&path, serde_json::to_vec(&doc)?).await?;
        Ok(path)
    }

    pub async fn remove_patient_json(&self, id: &str) -> Result<bool> {
        let path = self.patient_dir.join(format!("{}.json", validate_file_name(id)?));
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// 读取镜像目录中的所有患者 JSON，无效文件跳过
    pub async fn read_patient_jsons(&self) -> Result<Vec<Value>> {
        let mut dir = match tokio::fs::read_dir(&self.patient_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut patients = Vec::new();
        for path in paths {
            let parsed = tokio::fs::read(&path)
                .await
                .ok()
                .and_then(|raw| serde_json::from_slice::<Value>(&raw).ok())
                .filter(|v| v.get("id").is_some());
            match parsed {
                Some(value) => patients.push(value),
                None => debug!("Skipping invalid patient file {:?}", path),
            }
        }
        Ok(patients)
    }
}

/// 只保留普通路径分量
fn sanitize_relative(relative: &str) -> Result<PathBuf> {
    let cleaned: PathBuf = Path::new(relative)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if cleaned.as_os_str().is_empty() {
        return Err(TpsError::validation(format!("Invalid file name: {:?}", relative)));
    }
    Ok(cleaned)
}

/// 单级文件名，不允许路径分隔符与 `..`
fn validate_file_name(name: &str) -> Result<&str> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(TpsError::validation(format!("Invalid file name: {}", name)));
    }
    Ok(name)
}

/// 结果文件名主干：计划 ID、结果 ID 与毫秒时间戳
fn result_stem(plan_id: i64, result_id: i64) -> String {
    format!("{}_{}_{}", plan_id, result_id, file_timestamp())
}
