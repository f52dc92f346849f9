//! 数据库模型

use chrono::{DateTime, NaiveDate, Utc};
use radiate_core::models::*;
use sqlx::FromRow;

// 数据库表模型 - 使用FromRow trait用于SQL查询
// 数组字段以 JSON 文本存储，解析失败时按缺省值处理

fn json_column<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Option<T> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: String,
    pub name: String,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<String>, // 存储为单字符，转换为Sex枚举
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbPatient> for Patient {
    fn from(db_patient: DbPatient) -> Self {
        Patient {
            id: db_patient.id,
            name: db_patient.name,
            birth_date: db_patient.birth_date,
            sex: db_patient.sex.as_deref().and_then(Sex::from_code),
            created_at: Some(db_patient.created_at),
            updated_at: Some(db_patient.updated_at),
        }
    }
}

/// 数据库 CT 表
#[derive(Debug, FromRow)]
pub struct DbCtScan {
    pub id: i64,
    pub patient_id: String,
    pub name: Option<String>,
    pub file_path: Option<String>,
    pub dataset_name: Option<String>,
    pub slice_count: Option<i64>,
    pub spacing: Option<String>,
    pub origin: Option<String>,
    pub grid_size: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbCtScan> for CtScan {
    fn from(db_ct: DbCtScan) -> Self {
        CtScan {
            id: db_ct.id,
            patient_id: db_ct.patient_id,
            name: db_ct.name,
            file_path: db_ct.file_path,
            dataset_name: db_ct.dataset_name,
            slice_count: db_ct.slice_count,
            spacing: json_column(db_ct.spacing),
            origin: json_column(db_ct.origin),
            grid_size: json_column(db_ct.grid_size),
            created_at: db_ct.created_at,
        }
    }
}

/// 数据库 ROI 表
#[derive(Debug, FromRow)]
pub struct DbRoi {
    pub id: i64,
    pub patient_id: String,
    pub ct_scan_id: Option<i64>,
    pub name: String,
    pub roi_type: Option<String>,
    pub color: Option<String>,
    pub mask_file_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbRoi> for Roi {
    fn from(db_roi: DbRoi) -> Self {
        Roi {
            id: db_roi.id,
            patient_id: db_roi.patient_id,
            ct_scan_id: db_roi.ct_scan_id,
            name: db_roi.name,
            roi_type: db_roi.roi_type,
            color: db_roi.color,
            mask_file_path: db_roi.mask_file_path,
            created_at: db_roi.created_at,
        }
    }
}

/// 数据库治疗计划表
#[derive(Debug, FromRow)]
pub struct DbTreatmentPlan {
    pub id: i64,
    pub patient_id: String,
    pub ct_scan_id: i64,
    pub plan_name: String,
    pub plan_type: Option<String>,
    pub beam_names: Option<String>,
    pub gantry_angles: Option<String>,
    pub couch_angles: Option<String>,
    pub spot_spacing: Option<f64>,
    pub layer_spacing: Option<f64>,
    pub target_margin: Option<f64>,
    pub target_roi_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbTreatmentPlan> for TreatmentPlan {
    fn from(db_plan: DbTreatmentPlan) -> Self {
        TreatmentPlan {
            id: db_plan.id,
            patient_id: db_plan.patient_id,
            ct_scan_id: db_plan.ct_scan_id,
            plan_name: db_plan.plan_name,
            plan_type: db_plan
                .plan_type
                .as_deref()
                .map(PlanType::parse)
                .unwrap_or_default(),
            beam_names: json_column(db_plan.beam_names).unwrap_or_default(),
            gantry_angles: json_column(db_plan.gantry_angles).unwrap_or_default(),
            couch_angles: json_column(db_plan.couch_angles).unwrap_or_default(),
            spot_spacing: db_plan.spot_spacing.unwrap_or(DEFAULT_SPACING_MM),
            layer_spacing: db_plan.layer_spacing.unwrap_or(DEFAULT_SPACING_MM),
            target_margin: db_plan.target_margin.unwrap_or(DEFAULT_SPACING_MM),
            target_roi_id: db_plan.target_roi_id,
            created_at: db_plan.created_at,
            updated_at: Some(db_plan.updated_at),
        }
    }
}

/// 数据库剂量结果表
#[derive(Debug, FromRow)]
pub struct DbDoseResult {
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
    pub dvh_data: Option<String>,
    pub computation_status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbDoseResult> for DoseResult {
    fn from(db_result: DbDoseResult) -> Self {
        DoseResult {
            id: db_result.id,
            plan_id: db_result.plan_id,
            ct_scan_id: db_result.ct_scan_id,
            roi_id: db_result.roi_id,
            dose_file_path: db_result.dose_file_path,
            dvh_file_path: db_result.dvh_file_path,
            visualization_image_path: db_result.visualization_image_path,
            d95: db_result.d95,
            d5: db_result.d5,
            mean_dose: db_result.mean_dose,
            max_dose: db_result.max_dose,
            dvh_data: json_column(db_result.dvh_data),
            computation_status: ComputationStatus::parse(&db_result.computation_status),
            error_message: db_result.error_message,
            created_at: db_result.created_at,
        }
    }
}

// 插入模型

/// 计划间距与外扩的缺省值 (mm)
pub const DEFAULT_SPACING_MM: f64 = 5.0;

/// 新患者插入模型
#[derive(Debug, Clone)]
pub struct NewPatient {
    pub id: String,
    pub name: String,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<Sex>,
}

/// 新 CT 插入模型
#[derive(Debug, Clone, Default)]
pub struct NewCtScan {
    pub patient_id: String,
    pub name: Option<String>,
    pub file_path: Option<String>,
    pub dataset_name: Option<String>,
    pub slice_count: Option<i64>,
    pub spacing: Option<[f64; 3]>,
    pub origin: Option<[f64; 3]>,
    pub grid_size: Option<[usize; 3]>,
}

/// 新 ROI 插入模型
#[derive(Debug, Clone, Default)]
pub struct NewRoi {
    pub patient_id: String,
    pub ct_scan_id: Option<i64>,
    pub name: String,
    pub roi_type: Option<String>,
    pub color: Option<String>,
    pub mask_file_path: Option<String>,
}

/// 新治疗计划插入模型
#[derive(Debug, Clone)]
pub struct NewTreatmentPlan {
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
}

impl NewTreatmentPlan {
    /// 默认三野 (0°/90°/270°) 计划
    pub fn with_defaults(patient_id: String, ct_scan_id: i64) -> Self {
        Self {
            patient_id,
            ct_scan_id,
            plan_name: "New Plan".to_string(),
            plan_type: PlanType::Proton,
            beam_names: vec!["Beam1".to_string(), "Beam2".to_string(), "Beam3".to_string()],
            gantry_angles: vec![0.0, 90.0, 270.0],
            couch_angles: vec![0.0, 0.0, 0.0],
            spot_spacing: DEFAULT_SPACING_MM,
            layer_spacing: DEFAULT_SPACING_MM,
            target_margin: DEFAULT_SPACING_MM,
            target_roi_id: None,
        }
    }
}

/// 计划局部更新
///
/// `target_roi_id` 为 `Some(None)` 时清空靶区引用。
#[derive(Debug, Clone, Default)]
pub struct PlanUpdate {
    pub plan_name: Option<String>,
    pub plan_type: Option<PlanType>,
    pub beam_names: Option<Vec<String>>,
    pub gantry_angles: Option<Vec<f64>>,
    pub couch_angles: Option<Vec<f64>>,
    pub spot_spacing: Option<f64>,
    pub layer_spacing: Option<f64>,
    pub target_margin: Option<f64>,
    pub target_roi_id: Option<Option<i64>>,
}

impl PlanUpdate {
    pub fn apply(self, plan: &mut TreatmentPlan) {
        if let Some(v) = self.plan_name {
            plan.plan_name = v;
        }
        if let Some(v) = self.plan_type {
            plan.plan_type = v;
        }
        if let Some(v) = self.beam_names {
            plan.beam_names = v;
        }
        if let Some(v) = self.gantry_angles {
            plan.gantry_angles = v;
        }
        if let Some(v) = self.couch_angles {
            plan.couch_angles = v;
        }
        if let Some(v) = self.spot_spacing {
            plan.spot_spacing = v;
        }
        if let Some(v) = self.layer_spacing {
            plan.layer_spacing = v;
        }
        if let Some(v) = self.target_margin {
            plan.target_margin = v;
        }
        if let Some(v) = self.target_roi_id {
            plan.target_roi_id = v;
        }
    }
}

/// 已完成剂量计算的结果字段
#[derive(Debug, Clone, Default)]
pub struct CompletedDose {
    pub dose_file_path: Option<String>,
    pub dvh_file_path: Option<String>,
    pub visualization_image_path: Option<String>,
    pub d95: Option<f64>,
    pub d5: Option<f64>,
    pub mean_dose: Option<f64>,
    pub max_dose: Option<f64>,
    pub dvh_data: Option<DvhData>,
}
