//! 核心数据模型定义
//!
//! JSON 字段名与前端约定保持一致（例如患者的 `birthDate`）。

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 患者基本信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub name: String,
    #[serde(rename = "birthDate")]
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<Sex>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// 性别枚举，持久化为单字符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "M", alias = "Male", alias = "male", alias = "m")]
    Male,
    #[serde(rename = "F", alias = "Female", alias = "female", alias = "f")]
    Female,
    #[serde(rename = "O", alias = "Other", alias = "other", alias = "o")]
    Other,
}

impl Sex {
    pub fn as_code(&self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
            Sex::Other => "O",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "M" => Some(Sex::Male),
            "F" => Some(Sex::Female),
            "O" => Some(Sex::Other),
            _ => None,
        }
    }
}

/// CT 影像记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtScan {
    pub id: i64,
    pub patient_id: String,
    pub name: Option<String>,
    pub file_path: Option<String>,
    pub dataset_name: Option<String>,
    pub slice_count: Option<i64>,
    pub spacing: Option<[f64; 3]>,
    pub origin: Option<[f64; 3]>,
    pub grid_size: Option<[usize; 3]>,
    pub created_at: DateTime<Utc>,
}

/// 感兴趣区域 (ROI)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub id: i64,
    pub patient_id: String,
    pub ct_scan_id: Option<i64>,
    pub name: String,
    pub roi_type: Option<String>,
    pub color: Option<String>,
    #[serde(skip)]
    pub mask_file_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 计划类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanType {
    Proton,
    Photon,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Proton => "Proton",
            PlanType::Photon => "Photon",
        }
    }

    /// 非 `Proton` 的取值一律按光子计划处理
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("proton") {
            PlanType::Proton
        } else {
            PlanType::Photon
        }
    }
}

impl Default for PlanType {
    fn default() -> Self {
        PlanType::Proton
    }
}

/// 治疗计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentPlan {
    pub id: i64,
    pub patient_id: String,
    pub ct_scan_id: i64,
    pub plan_name: String,
    pub plan_type: PlanType,
    pub beam_names: Vec<String>,
    pub gantry_angles: Vec<f64>,
    pub couch_angles: Vec<f64>,
    pub spot_spacing: f64,
    pub layer_spacing: f64,
    pub target_margin: f64,
    pub target_roi_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// 剂量计算状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputationStatus {
    Pending,
    Computing,
    Completed,
    Failed,
}

impl ComputationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputationStatus::Pending => "pending",
            ComputationStatus::Computing => "computing",
            ComputationStatus::Completed => "completed",
            ComputationStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "computing" => ComputationStatus::Computing,
            "completed" => ComputationStatus::Completed,
            "failed" => ComputationStatus::Failed,
            _ => ComputationStatus::Pending,
        }
    }
}

/// 累积剂量体积直方图曲线
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DvhData {
    pub dose_values: Vec<f64>,
    pub volume_percentages: Vec<f64>,
}

/// 剂量计算结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseResult {
    pub id: i64,
    pub plan_id: i64,
    pub ct_scan_id: i64,
    pub roi_id: Option<i64>,
    pub dose_file_path: Option<String>,
    pub dvh_file_path: Option<String>,
    pub visualization_image_path: Option<String>,
    pub d95: Option<f64>,
    pub d5: Option<f64>,
    pub mean_dose: Option<f64>,
    pub max_dose: Option<f64>,
    pub dvh_data: Option<DvhData>,
    pub computation_status: ComputationStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 切片方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SliceView {
    Axial,
    Coronal,
    Sagittal,
}

impl SliceView {
    /// 未知取值回退为横断面
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("coronal") => SliceView::Coronal,
            Some("sagittal") => SliceView::Sagittal,
            _ => SliceView::Axial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SliceView::Axial => "axial",
            SliceView::Coronal => "coronal",
            SliceView::Sagittal => "sagittal",
        }
    }
}

impl Default for SliceView {
    fn default() -> Self {
        SliceView::Axial
    }
}
