//! 体素网格与三维体数据
//!
//! 体数据按 `[x][y][z]` 行优先存储，与 numpy `(X, Y, Z)` 数组布局一致。
//! 网格轴与患者坐标轴对齐，`origin` 为体素 `(0, 0, 0)` 中心的物理坐标 (mm)。

use radiate_core::{Result, SliceView, TpsError};
use serde::{Deserialize, Serialize};

/// 体素网格几何
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub shape: [usize; 3],
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
}

impl Grid {
    pub fn new(shape: [usize; 3], spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self {
            shape,
            spacing,
            origin,
        }
    }

    /// 体素间距须为正的有限值
    pub fn validate(&self) -> Result<()> {
        if self.spacing.iter().all(|s| s.is_finite() && *s > 0.0) {
            Ok(())
        } else {
            Err(TpsError::validation(format!(
                "grid spacing must be positive, got {:?}",
                self.spacing
            )))
        }
    }

    /// 体素总数
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (x * self.shape[1] + y) * self.shape[2] + z
    }

    /// 体素中心的物理坐标
    pub fn position(&self, voxel: [usize; 3]) -> [f64; 3] {
        [
            self.origin[0] + voxel[0] as f64 * self.spacing[0],
            self.origin[1] + voxel[1] as f64 * self.spacing[1],
            self.origin[2] + voxel[2] as f64 * self.spacing[2],
        ]
    }

    /// 物理坐标对应的连续体素索引
    pub fn continuous_index(&self, position: [f64; 3]) -> [f64; 3] {
        [
            (position[0] - self.origin[0]) / self.spacing[0],
            (position[1] - self.origin[1]) / self.spacing[1],
            (position[2] - self.origin[2]) / self.spacing[2],
        ]
    }

    /// 最近体素索引，网格外返回 `None`
    pub fn voxel_index(&self, position: [f64; 3]) -> Option<[usize; 3]> {
        let c = self.continuous_index(position);
        let mut out = [0usize; 3];
        for axis in 0..3 {
            let i = c[axis].round();
            if i < 0.0 || i >= self.shape[axis] as f64 {
                return None;
            }
            out[axis] = i as usize;
        }
        Some(out)
    }

    /// 网格物理范围 (mm)
    pub fn extent(&self) -> [f64; 3] {
        [
            self.shape[0] as f64 * self.spacing[0],
            self.shape[1] as f64 * self.spacing[1],
            self.shape[2] as f64 * self.spacing[2],
        ]
    }

    /// 网格中心的物理坐标
    pub fn center(&self) -> [f64; 3] {
        let mut c = [0.0; 3];
        for axis in 0..3 {
            c[axis] = self.origin[axis]
                + (self.shape[axis].saturating_sub(1)) as f64 * self.spacing[axis] / 2.0;
        }
        c
    }

    /// 以新的间距覆盖相同物理范围的网格
    pub fn with_spacing(&self, spacing: [f64; 3]) -> Grid {
        let extent = self.extent();
        let mut shape = [1usize; 3];
        for axis in 0..3 {
            shape[axis] = ((extent[axis] / spacing[axis]).floor() as usize).max(1);
        }
        Grid::new(shape, spacing, self.origin)
    }

    /// 指定方向上的切片数
    pub fn slice_count(&self, view: SliceView) -> usize {
        match view {
            SliceView::Axial => self.shape[2],
            SliceView::Coronal => self.shape[1],
            SliceView::Sagittal => self.shape[0],
        }
    }

    /// 第 `index` 层切片所在的单层网格
    pub fn plane(&self, view: SliceView, index: usize) -> Grid {
        let axis = match view {
            SliceView::Axial => 2,
            SliceView::Coronal => 1,
            SliceView::Sagittal => 0,
        };
        let mut plane = *self;
        plane.shape[axis] = 1;
        plane.origin[axis] += index as f64 * self.spacing[axis];
        plane
    }
}

/// 二维切片，`rows[row][col]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slice2D<T> {
    pub width: usize,
    pub height: usize,
    pub rows: Vec<Vec<T>>,
}

impl<T: Copy> Slice2D<T> {
    pub fn get(&self, col: usize, row: usize) -> T {
        self.rows[row][col]
    }

    pub fn map<U>(&self, f: impl Fn(T) -> U) -> Slice2D<U> {
        Slice2D {
            width: self.width,
            height: self.height,
            rows: self
                .rows
                .iter()
                .map(|row| row.iter().map(|v| f(*v)).collect())
                .collect(),
        }
    }
}

/// 三维体数据
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    grid: Grid,
    data: Vec<T>,
}

impl<T: Copy> Volume<T> {
    pub fn new(grid: Grid, data: Vec<T>) -> Result<Self> {
        if data.len() != grid.len() {
            return Err(TpsError::Imaging(format!(
                "volume data has {} voxels, grid {:?} expects {}",
                data.len(),
                grid.shape,
                grid.len()
            )));
        }
        Ok(Self { grid, data })
    }

    pub fn filled(grid: Grid, value: T) -> Self {
        Self {
            data: vec![value; grid.len()],
            grid,
        }
    }

    pub fn from_fn(grid: Grid, mut f: impl FnMut([usize; 3]) -> T) -> Self {
        let mut data = Vec::with_capacity(grid.len());
        for x in 0..grid.shape[0] {
            for y in 0..grid.shape[1] {
                for z in 0..grid.shape[2] {
                    data.push(f([x, y, z]));
                }
            }
        }
        Self { grid, data }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn shape(&self) -> [usize; 3] {
        self.grid.shape
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> T {
        self.data[self.grid.index(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) {
        let i = self.grid.index(x, y, z);
        self.data[i] = value;
    }

    /// 提取二维切片（已转置，行对应纵轴）
    ///
    /// - 横断面：`[:, :, k]^T`，宽 X 高 Y
    /// - 冠状面：`[:, k, :]^T`，宽 X 高 Z
    /// - 矢状面：`[k, :, :]^T`，宽 Y 高 Z
    pub fn slice(&self, view: SliceView, index: usize) -> Result<Slice2D<T>> {
        let [nx, ny, nz] = self.grid.shape;
        let (axis_name, limit) = match view {
            SliceView::Axial => ("Z", nz),
            SliceView::Coronal => ("Y", ny),
            SliceView::Sagittal => ("X", nx),
        };
        if index >= limit {
            return Err(TpsError::validation(format!(
                "Slice {} exceeds {} dimension ({})",
                index, axis_name, limit
            )));
        }

        let slice = match view {
            SliceView::Axial => Slice2D {
                width: nx,
                height: ny,
                rows: (0..ny)
                    .map(|y| (0..nx).map(|x| self.get(x, y, index)).collect())
                    .collect(),
            },
            SliceView::Coronal => Slice2D {
                width: nx,
                height: nz,
                rows: (0..nz)
                    .map(|z| (0..nx).map(|x| self.get(x, index, z)).collect())
                    .collect(),
            },
            SliceView::Sagittal => Slice2D {
                width: ny,
                height: nz,
                rows: (0..nz)
                    .map(|z| (0..ny).map(|y| self.get(index, y, z)).collect())
                    .collect(),
            },
        };
        Ok(slice)
    }

    /// 最近邻重采样到目标网格，网格外取 `fill`
    pub fn resample_nearest(&self, target: &Grid, fill: T) -> Volume<T> {
        if *target == self.grid {
            return self.clone();
        }
        let maps: Vec<Vec<Option<usize>>> = (0..3)
            .map(|axis| {
                (0..target.shape[axis])
                    .map(|i| {
                        let pos = target.origin[axis] + i as f64 * target.spacing[axis];
                        let c = ((pos - self.grid.origin[axis]) / self.grid.spacing[axis]).round();
                        if c < 0.0 || c >= self.grid.shape[axis] as f64 {
                            None
                        } else {
                            Some(c as usize)
                        }
                    })
                    .collect()
            })
            .collect();

        Volume::from_fn(*target, |[x, y, z]| match (maps[0][x], maps[1][y], maps[2][z]) {
            (Some(sx), Some(sy), Some(sz)) => self.get(sx, sy, sz),
            _ => fill,
        })
    }
}

/// 单轴线性插值权重：(下标0, 下标1, 权重)
fn axis_weights(c: f64, n: usize) -> Option<(usize, usize, f64)> {
    if n == 0 {
        return None;
    }
    if n == 1 {
        return if c.abs() <= 0.5 { Some((0, 0, 0.0)) } else { None };
    }
    let max = (n - 1) as f64;
    if c < -0.5 || c > max + 0.5 {
        return None;
    }
    let c = c.clamp(0.0, max);
    let i0 = (c.floor() as usize).min(n - 2);
    Some((i0, i0 + 1, c - i0 as f64))
}

impl Volume<f32> {
    /// 三线性插值重采样到目标网格，网格外取 `fill`
    pub fn resample_linear(&self, target: &Grid, fill: f32) -> Volume<f32> {
        if *target == self.grid {
            return self.clone();
        }
        let maps: Vec<Vec<Option<(usize, usize, f64)>>> = (0..3)
            .map(|axis| {
                (0..target.shape[axis])
                    .map(|i| {
                        let pos = target.origin[axis] + i as f64 * target.spacing[axis];
                        let c = (pos - self.grid.origin[axis]) / self.grid.spacing[axis];
                        axis_weights(c, self.grid.shape[axis])
                    })
                    .collect()
            })
            .collect();

        Volume::from_fn(*target, |[x, y, z]| {
            let (Some((x0, x1, wx)), Some((y0, y1, wy)), Some((z0, z1, wz))) =
                (maps[0][x], maps[1][y], maps[2][z])
            else {
                return fill;
            };
            let lerp = |a: f64, b: f64, w: f64| a + (b - a) * w;
            let v = |xi, yi, zi| self.get(xi, yi, zi) as f64;
            let c00 = lerp(v(x0, y0, z0), v(x1, y0, z0), wx);
            let c10 = lerp(v(x0, y1, z0), v(x1, y1, z0), wx);
            let c01 = lerp(v(x0, y0, z1), v(x1, y0, z1), wx);
            let c11 = lerp(v(x0, y1, z1), v(x1, y1, z1), wx);
            let c0 = lerp(c00, c10, wy);
            let c1 = lerp(c01, c11, wy);
            lerp(c0, c1, wz) as f32
        })
    }

    /// 最小值与最大值，空体数据返回 `None`
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.data.iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

impl Volume<bool> {
    /// 掩膜内体素数
    pub fn count(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }

    /// 掩膜质心的物理坐标
    pub fn center_of_mass(&self) -> Option<[f64; 3]> {
        let mut sum = [0.0f64; 3];
        let mut n = 0usize;
        for x in 0..self.grid.shape[0] {
            for y in 0..self.grid.shape[1] {
                for z in 0..self.grid.shape[2] {
                    if self.get(x, y, z) {
                        let p = self.grid.position([x, y, z]);
                        sum[0] += p[0];
                        sum[1] += p[1];
                        sum[2] += p[2];
                        n += 1;
                    }
                }
            }
        }
        if n == 0 {
            return None;
        }
        Some([sum[0] / n as f64, sum[1] / n as f64, sum[2] / n as f64])
    }

    /// 掩膜内体素的物理坐标
    pub fn positions(&self) -> Vec<[f64; 3]> {
        let mut out = Vec::new();
        for x in 0..self.grid.shape[0] {
            for y in 0..self.grid.shape[1] {
                for z in 0..self.grid.shape[2] {
                    if self.get(x, y, z) {
                        out.push(self.grid.position([x, y, z]));
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed_volume() -> Volume<f32> {
        let grid = Grid::new([2, 3, 4], [1.0, 1.0, 1.0], [0.0, 0.0, 0.0]);
        Volume::from_fn(grid, |[x, y, z]| (x * 100 + y * 10 + z) as f32)
    }

    #[test]
    fn test_layout_matches_c_order() {
        let v = indexed_volume();
        assert_eq!(v.data()[0], 0.0);
        assert_eq!(v.data()[1], 1.0);
        assert_eq!(v.data()[4], 10.0);
        assert_eq!(v.data()[12], 100.0);
    }

    #[test]
    fn test_axial_slice_is_transposed() {
        let v = indexed_volume();
        let s = v.slice(SliceView::Axial, 2).unwrap();
        assert_eq!((s.width, s.height), (2, 3));
        assert_eq!(s.rows[0], vec![2.0, 102.0]);
        assert_eq!(s.rows[2], vec![22.0, 122.0]);
    }

    #[test]
    fn test_coronal_and_sagittal_slices() {
        let v = indexed_volume();
        let c = v.slice(SliceView::Coronal, 1).unwrap();
        assert_eq!((c.width, c.height), (2, 4));
        assert_eq!(c.rows[3], vec![13.0, 113.0]);

        let s = v.slice(SliceView::Sagittal, 1).unwrap();
        assert_eq!((s.width, s.height), (3, 4));
        assert_eq!(s.rows[0], vec![100.0, 110.0, 120.0]);
    }

    #[test]
    fn test_slice_out_of_range() {
        let v = indexed_volume();
        let err = v.slice(SliceView::Axial, 4).unwrap_err();
        assert_eq!(err.to_string(), "Slice 4 exceeds Z dimension (4)");
        assert!(v.slice(SliceView::Sagittal, 2).is_err());
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        let grid = Grid::new([2, 2, 2], [1.0; 3], [0.0; 3]);
        assert!(Volume::new(grid, vec![0.0f32; 7]).is_err());
    }

    #[test]
    fn test_linear_resample_interpolates() {
        let grid = Grid::new([2, 1, 1], [2.0, 1.0, 1.0], [0.0, 0.0, 0.0]);
        let v = Volume::new(grid, vec![0.0f32, 10.0]).unwrap();
        let target = Grid::new([3, 1, 1], [1.0, 1.0, 1.0], [0.0, 0.0, 0.0]);
        let r = v.resample_linear(&target, -1.0);
        assert_eq!(r.data(), &[0.0, 5.0, 10.0]);

        let outside = Grid::new([1, 1, 1], [1.0; 3], [10.0, 0.0, 0.0]);
        assert_eq!(v.resample_linear(&outside, -1.0).data(), &[-1.0]);
    }

    #[test]
    fn test_nearest_resample_of_mask() {
        let grid = Grid::new([4, 1, 1], [1.0; 3], [0.0; 3]);
        let mask = Volume::new(grid, vec![false, true, true, false]).unwrap();
        let coarse = Grid::new([2, 1, 1], [2.0, 1.0, 1.0], [1.0, 0.0, 0.0]);
        let r = mask.resample_nearest(&coarse, false);
        assert_eq!(r.data(), &[true, false]);
    }

    #[test]
    fn test_center_of_mass() {
        let grid = Grid::new([3, 3, 3], [2.0; 3], [-2.0; 3]);
        let mut mask = Volume::filled(grid, false);
        mask.set(1, 1, 1, true);
        mask.set(2, 1, 1, true);
        assert_eq!(mask.center_of_mass(), Some([1.0, 0.0, 0.0]));
        assert_eq!(mask.count(), 2);
    }

    #[test]
    fn test_with_spacing_covers_extent() {
        let grid = Grid::new([100, 50, 10], [1.0, 1.0, 3.0], [0.0; 3]);
        let scoring = grid.with_spacing([2.0, 2.0, 2.0]);
        assert_eq!(scoring.shape, [50, 25, 15]);
    }

    #[test]
    fn test_plane_grid_reproduces_slice() {
        let v = indexed_volume();
        for (view, index) in [(SliceView::Axial, 3), (SliceView::Coronal, 2), (SliceView::Sagittal, 1)] {
            let plane = v.grid().plane(view, index);
            assert_eq!(plane.slice_count(view), 1);
            let resampled = v.resample_linear(&plane, -1.0);
            assert_eq!(resampled.slice(view, 0).unwrap(), v.slice(view, index).unwrap());
        }
    }
}
