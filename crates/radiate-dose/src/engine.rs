//! 剂量引擎接口

use crate::analytical::AnalyticalDoseEngine;
use crate::external::ExternalDoseEngine;
use async_trait::async_trait;
use radiate_core::config::{DoseConfig, DoseEngineKind};
use radiate_core::{PlanType, Result, TpsError, TreatmentPlan};
use radiate_imaging::Volume;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// 射野设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamSetup {
    pub plan_type: PlanType,
    pub beam_names: Vec<String>,
    pub gantry_angles: Vec<f64>,
    pub couch_angles: Vec<f64>,
    pub spot_spacing: f64,
    pub layer_spacing: f64,
    pub target_margin: f64,
    pub nb_primaries: f64,
}

impl BeamSetup {
    pub fn from_plan(plan: &TreatmentPlan, nb_primaries: f64) -> Self {
        Self {
            plan_type: plan.plan_type,
            beam_names: plan.beam_names.clone(),
            gantry_angles: plan.gantry_angles.clone(),
            couch_angles: plan.couch_angles.clone(),
            spot_spacing: plan.spot_spacing,
            layer_spacing: plan.layer_spacing,
            target_margin: plan.target_margin,
            nb_primaries,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_beams(&self.beam_names, &self.gantry_angles, &self.couch_angles)?;
        if self.spot_spacing <= 0.0 || self.layer_spacing <= 0.0 || self.target_margin < 0.0 {
            return Err(TpsError::validation(
                "spot_spacing and layer_spacing must be positive, target_margin non-negative",
            ));
        }
        Ok(())
    }
}

/// 射野名称与角度数组须等长且至少一个射野
pub fn validate_beams(names: &[String], gantry: &[f64], couch: &[f64]) -> Result<()> {
    if names.is_empty() {
        return Err(TpsError::validation("At least one beam is required"));
    }
    if names.len() != gantry.len() || names.len() != couch.len() {
        return Err(TpsError::validation(format!(
            "beam_names ({}), gantry_angles ({}) and couch_angles ({}) must have the same length",
            names.len(),
            gantry.len(),
            couch.len()
        )));
    }
    Ok(())
}

/// 剂量计算请求
#[derive(Debug, Clone)]
pub struct DoseRequest {
    /// CT 体数据 (HU)
    pub ct: Arc<Volume<f32>>,
    /// 靶区掩膜，与 CT 同网格
    pub target: Option<Arc<Volume<bool>>>,
    pub beams: BeamSetup,
}

/// 剂量引擎
///
/// 返回与 CT 同网格的剂量分布 (Gy)。
#[async_trait]
pub trait DoseEngine: Send + Sync {
    /// 引擎名称
    fn name(&self) -> &str;

    /// 计算剂量
    async fn compute(&self, request: &DoseRequest) -> Result<Volume<f32>>;
}

/// 按配置创建剂量引擎，`disabled` 返回 `None`
pub fn build_engine(config: &DoseConfig) -> Result<Option<Arc<dyn DoseEngine>>> {
    let engine: Option<Arc<dyn DoseEngine>> = match config.engine {
        DoseEngineKind::Analytical => {
            Some(Arc::new(AnalyticalDoseEngine::new(config.prescription_gy)))
        }
        DoseEngineKind::External => {
            let command = config.external_command.clone().ok_or_else(|| {
                TpsError::Config("dose.external_command is required for the external engine".to_string())
            })?;
            Some(Arc::new(ExternalDoseEngine::new(
                command,
                config.external_args.clone(),
                config.work_dir.clone(),
                config.external_timeout_secs,
            )))
        }
        DoseEngineKind::Disabled => None,
    };
    match &engine {
        Some(e) => info!("Dose engine: {}", e.name()),
        None => info!("Dose engine disabled"),
    }
    Ok(engine)
}
