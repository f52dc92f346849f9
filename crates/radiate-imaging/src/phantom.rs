//! 合成体模：水/空气立方体与中心立方靶区，用于演示与测试

use crate::volume::{Grid, Volume};

pub const HU_AIR: f32 = -1024.0;
pub const HU_WATER: f32 = 0.0;

/// 合成体模
#[derive(Debug, Clone)]
pub struct Phantom {
    pub ct: Volume<f32>,
    pub target: Volume<bool>,
    pub target_name: String,
}

impl Phantom {
    /// 边长 `size` 体素、1 mm 各向同性的体模
    ///
    /// `y >= size / 3` 为水，其余为空气；靶区为中心附近 `[13/30, 17/30)` 的立方体。
    pub fn build(size: usize) -> Self {
        let size = size.max(3);
        let grid = Grid::new([size; 3], [1.0; 3], [0.0; 3]);
        let water_from = size / 3;
        let lo = size * 13 / 30;
        let hi = (size * 17 / 30).max(lo + 1);

        let ct = Volume::from_fn(grid, |[_, y, _]| if y >= water_from { HU_WATER } else { HU_AIR });
        let target = Volume::from_fn(grid, |[x, y, z]| {
            (lo..hi).contains(&x) && (lo..hi).contains(&y) && (lo..hi).contains(&z)
        });

        Self {
            ct,
            target,
            target_name: "TV".to_string(),
        }
    }
}
