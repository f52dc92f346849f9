//! RTSTRUCT 结构集与轮廓栅格化

use crate::volume::{Grid, Volume};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 平面轮廓多边形，顶点为患者坐标 (mm)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub points: Vec<[f64; 3]>,
}

/// 单个结构（ROI 轮廓）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub number: i32,
    pub name: String,
    pub color: Option<[u8; 3]>,
    pub polygons: Vec<Polygon>,
}

/// 结构集
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureSet {
    pub label: Option<String>,
    pub structures: Vec<Structure>,
}

impl StructureSet {
    pub fn names(&self) -> Vec<String> {
        self.structures.iter().map(|s| s.name.clone()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&Structure> {
        self.structures.iter().find(|s| s.name == name)
    }
}

impl Structure {
    /// 按奇偶规则将轮廓栅格化到给定网格
    ///
    /// 同一层上的多个多边形相互异或，内嵌多边形形成空洞。
    pub fn rasterize(&self, grid: &Grid) -> Volume<bool> {
        let mut mask = Volume::filled(*grid, false);
        let [nx, ny, nz] = grid.shape;

        for polygon in &self.polygons {
            if polygon.points.len() < 3 {
                continue;
            }
            let z = polygon.points.iter().map(|p| p[2]).sum::<f64>() / polygon.points.len() as f64;
            let k = ((z - grid.origin[2]) / grid.spacing[2]).round();
            if k < 0.0 || k >= nz as f64 {
                debug!("Contour of {} at z={} lies outside the grid", self.name, z);
                continue;
            }
            let k = k as usize;

            // 连续体素坐标下的顶点
            let pts: Vec<(f64, f64)> = polygon
                .points
                .iter()
                .map(|p| {
                    (
                        (p[0] - grid.origin[0]) / grid.spacing[0],
                        (p[1] - grid.origin[1]) / grid.spacing[1],
                    )
                })
                .collect();

            let min_y = pts.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
            let max_y = pts.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
            let j_start = min_y.ceil().max(0.0) as usize;
            let j_end = max_y.floor().min(ny as f64 - 1.0);
            if j_end < 0.0 {
                continue;
            }
            let j_end = j_end as usize;

            let mut crossings: Vec<f64> = Vec::new();
            for j in j_start..=j_end {
                let y = j as f64;
                crossings.clear();
                for e in 0..pts.len() {
                    let a = pts[e];
                    let b = pts[(e + 1) % pts.len()];
                    if (a.1 > y) != (b.1 > y) {
                        crossings.push(a.0 + (y - a.1) * (b.0 - a.0) / (b.1 - a.1));
                    }
                }
                crossings.sort_by(|a, b| a.total_cmp(b));

                for pair in crossings.chunks_exact(2) {
                    let i_start = pair[0].ceil().max(0.0);
                    let i_end = pair[1].floor().min(nx as f64 - 1.0);
                    if i_end < i_start {
                        continue;
                    }
                    for i in i_start as usize..=i_end as usize {
                        let inside = mask.get(i, j, k);
                        mask.set(i, j, k, !inside);
                    }
                }
            }
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64, z: f64) -> Polygon {
        Polygon {
            points: vec![[x0, y0, z], [x1, y0, z], [x1, y1, z], [x0, y1, z]],
        }
    }

    fn grid() -> Grid {
        Grid::new([10, 10, 3], [1.0, 1.0, 2.0], [0.0, 0.0, 0.0])
    }

    #[test]
    fn test_rasterize_square() {
        let s = Structure {
            number: 1,
            name: "PTV".to_string(),
            color: None,
            polygons: vec![square(2.0, 3.0, 5.0, 6.0, 2.0)],
        };
        let mask = s.rasterize(&grid());
        // 扫描线半开区间：y = 3..6 三行，x = 2..=5 四列，位于第 1 层
        assert_eq!(mask.count(), 12);
        assert!(mask.get(2, 3, 1));
        assert!(mask.get(5, 5, 1));
        assert!(!mask.get(5, 6, 1));
        assert!(!mask.get(6, 5, 1));
        assert!(!mask.get(3, 4, 0));
    }

    #[test]
    fn test_nested_polygon_makes_hole() {
        let s = Structure {
            number: 2,
            name: "Ring".to_string(),
            color: Some([0, 255, 0]),
            polygons: vec![square(1.0, 1.0, 8.0, 8.0, 0.0), square(3.0, 3.0, 6.0, 6.0, 0.0)],
        };
        let mask = s.rasterize(&grid());
        assert_eq!(mask.count(), 7 * 8 - 3 * 4);
        assert!(!mask.get(4, 4, 0));
        assert!(mask.get(1, 1, 0));
    }

    #[test]
    fn test_contour_outside_grid_is_ignored() {
        let s = Structure {
            number: 3,
            name: "Far".to_string(),
            color: None,
            polygons: vec![square(1.0, 1.0, 3.0, 3.0, 50.0)],
        };
        assert_eq!(s.rasterize(&grid()).count(), 0);
    }

    #[test]
    fn test_structure_set_lookup() {
        let set = StructureSet {
            label: None,
            structures: vec![Structure {
                number: 1,
                name: "Brainstem".to_string(),
                color: None,
                polygons: vec![],
            }],
        };
        assert_eq!(set.names(), vec!["Brainstem".to_string()]);
        assert!(set.find("Brainstem").is_some());
        assert!(set.find("Body").is_none());
    }
}
