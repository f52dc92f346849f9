//! 剂量体积直方图 (DVH)

use radiate_core::{DvhData, Result, TpsError};
use radiate_imaging::Volume;
use serde::Serialize;

/// 默认直方图采样点数
pub const DEFAULT_BINS: usize = 100;

/// 某结构的累积 DVH
#[derive(Debug, Clone, Serialize)]
pub struct Dvh {
    pub name: String,
    /// 结构内体素剂量，升序
    #[serde(skip)]
    doses: Vec<f64>,
}

impl Dvh {
    /// 统计掩膜内的剂量，剂量与掩膜须在同一网格
    pub fn compute(name: impl Into<String>, dose: &Volume<f32>, mask: &Volume<bool>) -> Result<Self> {
        let name = name.into();
        if dose.grid() != mask.grid() {
            return Err(TpsError::Imaging(format!(
                "DVH of {}: dose grid {:?} does not match mask grid {:?}",
                name,
                dose.shape(),
                mask.shape()
            )));
        }
        let mut doses: Vec<f64> = dose
            .data()
            .iter()
            .zip(mask.data())
            .filter(|(_, inside)| **inside)
            .map(|(d, _)| *d as f64)
            .collect();
        if doses.is_empty() {
            return Err(TpsError::validation(format!("DVH of {}: mask is empty", name)));
        }
        doses.sort_by(|a, b| a.total_cmp(b));
        Ok(Self { name, doses })
    }

    pub fn voxel_count(&self) -> usize {
        self.doses.len()
    }

    /// `D{percent}`：结构中 `percent`% 体积所受的最低剂量
    pub fn dx(&self, percent: f64) -> f64 {
        let n = self.doses.len();
        let index = (n as f64 * (1.0 - percent / 100.0)).floor().max(0.0) as usize;
        self.doses[index.min(n - 1)]
    }

    pub fn d95(&self) -> f64 {
        self.dx(95.0)
    }

    pub fn d5(&self) -> f64 {
        self.dx(5.0)
    }

    pub fn mean(&self) -> f64 {
        self.doses.iter().sum::<f64>() / self.doses.len() as f64
    }

    pub fn max(&self) -> f64 {
        self.doses[self.doses.len() - 1]
    }

    pub fn min(&self) -> f64 {
        self.doses[0]
    }

    /// 累积直方图：`0..=max` 等距 `bins` 个剂量点及其对应的体积百分比
    pub fn histogram(&self, bins: usize) -> DvhData {
        let bins = bins.max(2);
        let max = self.max();
        let n = self.doses.len() as f64;
        let mut data = DvhData::default();
        for i in 0..bins {
            let d = max * i as f64 / (bins - 1) as f64;
            let below = self.doses.partition_point(|v| *v < d);
            data.dose_values.push(d);
            data.volume_percentages.push((n - below as f64) / n * 100.0);
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radiate_imaging::Grid;

    fn ramp() -> (Volume<f32>, Volume<bool>) {
        let grid = Grid::new([10, 10, 2], [1.0; 3], [0.0; 3]);
        // z = 0 层为 1..=100 Gy，z = 1 层在掩膜外
        let dose = Volume::from_fn(grid, |[x, y, z]| if z == 0 { (x * 10 + y + 1) as f32 } else { 500.0 });
        let mask = Volume::from_fn(grid, |[_, _, z]| z == 0);
        (dose, mask)
    }

    #[test]
    fn test_percentiles_and_moments() {
        let (dose, mask) = ramp();
        let dvh = Dvh::compute("PTV", &dose, &mask).unwrap();
        assert_eq!(dvh.voxel_count(), 100);
        assert_eq!(dvh.d95(), 6.0);
        assert_eq!(dvh.d5(), 96.0);
        assert_eq!(dvh.dx(0.0), 100.0);
        assert!((dvh.mean() - 50.5).abs() < 1e-9);
        assert_eq!(dvh.max(), 100.0);
        assert_eq!(dvh.min(), 1.0);
    }

    #[test]
    fn test_cumulative_histogram() {
        let (dose, mask) = ramp();
        let h = Dvh::compute("PTV", &dose, &mask).unwrap().histogram(11);
        assert_eq!(h.dose_values.len(), 11);
        assert_eq!(h.dose_values[5], 50.0);
        assert_eq!(h.volume_percentages[0], 100.0);
        assert_eq!(h.volume_percentages[5], 51.0);
        assert_eq!(h.volume_percentages[10], 1.0);
    }

    #[test]
    fn test_empty_mask_and_grid_mismatch() {
        let (dose, _) = ramp();
        let empty = Volume::filled(*dose.grid(), false);
        assert!(matches!(
            Dvh::compute("Body", &dose, &empty),
            Err(TpsError::Validation(_))
        ));

        let other = Volume::filled(Grid::new([2, 2, 2], [1.0; 3], [0.0; 3]), true);
        assert!(Dvh::compute("Body", &dose, &other).is_err());
    }
}
