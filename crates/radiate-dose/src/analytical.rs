//! 解析剂量模型
//!
//! 每个射野：横向为 sigmoid 半影的圆形野，纵向按水等效深度计算。
//! 质子使用扩展布拉格峰 (SOBP) 平台，光子使用建成区加指数衰减。
//! 各射野剂量叠加后按靶区平均剂量归一化到处方剂量。

use crate::engine::{BeamSetup, DoseEngine, DoseRequest};
use async_trait::async_trait;
use radiate_core::{PlanType, Result, TpsError};
use radiate_imaging::Volume;
use tracing::{debug, info};

/// 低于该值视为空气，不沉积剂量
const AIR_THRESHOLD_HU: f32 = -950.0;
const MIN_PENUMBRA_MM: f64 = 2.0;
/// 无靶区时的默认野半径与平台半宽
const DEFAULT_FIELD_RADIUS_MM: f64 = 20.0;
const PHOTON_BUILDUP_MM: f64 = 15.0;
const PHOTON_MU_PER_MM: f64 = 0.005;
const PROTON_ENTRANCE_FRACTION: f64 = 0.3;

/// 解析剂量引擎
#[derive(Debug, Clone)]
pub struct AnalyticalDoseEngine {
    prescription_gy: f64,
}

impl AnalyticalDoseEngine {
    pub fn new(prescription_gy: f64) -> Self {
        Self { prescription_gy }
    }
}

#[async_trait]
impl DoseEngine for AnalyticalDoseEngine {
    fn name(&self) -> &str {
        "analytical"
    }

    async fn compute(&self, request: &DoseRequest) -> Result<Volume<f32>> {
        request.beams.validate()?;
        let request = request.clone();
        let prescription = self.prescription_gy;
        tokio::task::spawn_blocking(move || {
            compute_dose(&request.ct, request.target.as_deref(), &request.beams, prescription)
        })
        .await
        .map_err(|e| TpsError::DoseEngine(format!("dose task failed: {}", e)))?
    }
}

/// 同步计算剂量分布
pub fn compute_dose(
    ct: &Volume<f32>,
    target: Option<&Volume<bool>>,
    beams: &BeamSetup,
    prescription_gy: f64,
) -> Result<Volume<f32>> {
    let grid = *ct.grid();
    grid.validate()?;
    if let Some(mask) = target {
        if *mask.grid() != grid {
            return Err(TpsError::DoseEngine(
                "target mask is not on the CT grid".to_string(),
            ));
        }
    }

    let target_points = target.map(|m| m.positions()).filter(|p| !p.is_empty());
    let isocenter = match &target_points {
        Some(points) => centroid(points),
        None => grid.center(),
    };
    let step = grid.spacing.iter().copied().fold(f64::INFINITY, f64::min);
    let sigma = (beams.spot_spacing / 2.0).max(MIN_PENUMBRA_MM);

    let mut dose = vec![0.0f64; grid.len()];
    for (name, (&gantry, &couch)) in beams
        .beam_names
        .iter()
        .zip(beams.gantry_angles.iter().zip(&beams.couch_angles))
    {
        let field = BeamField::new(ct, gantry, couch, isocenter, target_points.as_deref(), beams, step);
        debug!(
            "Beam {}: radius {:.1} mm, depth {:.1}..{:.1} mm",
            name, field.radius, field.depth_min, field.depth_max
        );
        let cutoff = field.radius + 4.0 * sigma;

        for x in 0..grid.shape[0] {
            for y in 0..grid.shape[1] {
                for z in 0..grid.shape[2] {
                    if ct.get(x, y, z) < AIR_THRESHOLD_HU {
                        continue;
                    }
                    let p = grid.position([x, y, z]);
                    let lateral = field.lateral_distance(p);
                    if lateral > cutoff {
                        continue;
                    }
                    let depth = radiological_depth(ct, p, field.direction, step);
                    let value = lateral_profile(lateral, field.radius, sigma)
                        * field.depth_profile(beams.plan_type, depth);
                    dose[grid.index(x, y, z)] += value;
                }
            }
        }
    }

    let reference = match target {
        Some(mask) if mask.count() > 0 => {
            let (sum, n) = mask
                .data()
                .iter()
                .zip(&dose)
                .filter(|(inside, _)| **inside)
                .fold((0.0, 0usize), |(s, n), (_, d)| (s + d, n + 1));
            sum / n as f64
        }
        _ => dose.iter().copied().fold(0.0, f64::max),
    };
    if !(reference > 0.0) {
        return Err(TpsError::DoseEngine(
            "computed dose is zero inside the target".to_string(),
        ));
    }
    let scale = prescription_gy / reference;
    info!(
        "Analytical dose computed for {} beams, normalisation factor {:.4}",
        beams.beam_names.len(),
        scale
    );

    Volume::new(grid, dose.into_iter().map(|d| (d * scale) as f32).collect())
}

/// 射野方向（射束前进方向）
///
/// 机架角绕患者纵轴旋转，治疗床角绕竖直轴旋转；0° 时沿 +y。
pub fn beam_direction(gantry_deg: f64, couch_deg: f64) -> [f64; 3] {
    let (g, c) = (gantry_deg.to_radians(), couch_deg.to_radians());
    [g.sin() * c.cos(), g.cos(), g.sin() * c.sin()]
}

struct BeamField {
    direction: [f64; 3],
    isocenter: [f64; 3],
    radius: f64,
    depth_min: f64,
    depth_max: f64,
    falloff: f64,
}

impl BeamField {
    fn new(
        ct: &Volume<f32>,
        gantry: f64,
        couch: f64,
        isocenter: [f64; 3],
        target_points: Option<&[[f64; 3]]>,
        beams: &BeamSetup,
        step: f64,
    ) -> Self {
        let direction = beam_direction(gantry, couch);
        let mut field = Self {
            direction,
            isocenter,
            radius: 0.0,
            depth_min: 0.0,
            depth_max: 0.0,
            falloff: (beams.layer_spacing / 2.0).max(1.0),
        };

        match target_points {
            Some(points) => {
                let mut lo = f64::INFINITY;
                let mut hi = f64::NEG_INFINITY;
                let mut radius: f64 = 0.0;
                for p in points {
                    radius = radius.max(field.lateral_distance(*p));
                    let depth = radiological_depth(ct, *p, direction, step);
                    lo = lo.min(depth);
                    hi = hi.max(depth);
                }
                field.radius = radius + beams.target_margin;
                field.depth_min = (lo - beams.target_margin).max(0.0);
                field.depth_max = hi + beams.target_margin;
            }
            None => {
                let depth = radiological_depth(ct, isocenter, direction, step);
                field.radius = DEFAULT_FIELD_RADIUS_MM + beams.target_margin;
                field.depth_min = (depth - DEFAULT_FIELD_RADIUS_MM).max(0.0);
                field.depth_max = depth + DEFAULT_FIELD_RADIUS_MM;
            }
        }
        field
    }

    fn lateral_distance(&self, p: [f64; 3]) -> f64 {
        let rel = [
            p[0] - self.isocenter[0],
            p[1] - self.isocenter[1],
            p[2] - self.isocenter[2],
        ];
        let along = rel[0] * self.direction[0] + rel[1] * self.direction[1] + rel[2] * self.direction[2];
        let perp = [
            rel[0] - along * self.direction[0],
            rel[1] - along * self.direction[1],
            rel[2] - along * self.direction[2],
        ];
        (perp[0] * perp[0] + perp[1] * perp[1] + perp[2] * perp[2]).sqrt()
    }

    fn depth_profile(&self, plan_type: PlanType, depth: f64) -> f64 {
        match plan_type {
            PlanType::Proton => {
                if depth > self.depth_max {
                    let t = (depth - self.depth_max) / self.falloff;
                    if t > 3.0 {
                        0.0
                    } else {
                        (-t * t).exp()
                    }
                } else if depth >= self.depth_min {
                    1.0
                } else {
                    PROTON_ENTRANCE_FRACTION
                        + (1.0 - PROTON_ENTRANCE_FRACTION) * depth / self.depth_min
                }
            }
            PlanType::Photon => {
                (1.0 - (-depth / PHOTON_BUILDUP_MM).exp()) * (-PHOTON_MU_PER_MM * depth).exp()
            }
        }
    }
}

fn lateral_profile(r: f64, radius: f64, sigma: f64) -> f64 {
    1.0 / (1.0 + ((r - radius) / sigma).exp())
}

/// 沿射束反方向到体外的水等效路径长度 (mm)
fn radiological_depth(ct: &Volume<f32>, p: [f64; 3], direction: [f64; 3], step: f64) -> f64 {
    let grid = ct.grid();
    let mut depth = 0.0;
    let mut t = step / 2.0;
    while let Some([i, j, k]) = grid.voxel_index([
        p[0] - direction[0] * t,
        p[1] - direction[1] * t,
        p[2] - direction[2] * t,
    ]) {
        let hu = ct.get(i, j, k);
        if hu >= AIR_THRESHOLD_HU {
            depth += step * relative_density(hu);
        }
        t += step;
    }
    depth
}

fn relative_density(hu: f32) -> f64 {
    ((hu as f64 + 1000.0) / 1000.0).clamp(0.0, 3.0)
}

fn centroid(points: &[[f64; 3]]) -> [f64; 3] {
    let n = points.len() as f64;
    let mut c = [0.0; 3];
    for p in points {
        c[0] += p[0];
        c[1] += p[1];
        c[2] += p[2];
    }
    [c[0] / n, c[1] / n, c[2] / n]
}
