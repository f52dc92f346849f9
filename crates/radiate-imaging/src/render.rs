//! 剂量叠加图渲染 (PNG)

use crate::volume::Slice2D;
use radiate_core::{Result, TpsError};

/// 叠加透明度
const DOSE_ALPHA: f32 = 0.5;

/// jet 伪彩色映射，`t` 取值 `[0, 1]`
pub fn jet(t: f32) -> [u8; 3] {
    let t = t.clamp(0.0, 1.0);
    let channel = |offset: f32| -> u8 {
        let v = (1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// 渲染 CT 灰度底图，叠加剂量伪彩与掩膜红色轮廓，返回 PNG 字节
pub fn render_overlay(
    ct: &Slice2D<f32>,
    dose: Option<&Slice2D<f32>>,
    mask: Option<&Slice2D<bool>>,
) -> Result<Vec<u8>> {
    let (width, height) = (ct.width, ct.height);
    if width == 0 || height == 0 {
        return Err(TpsError::Imaging("cannot render an empty slice".to_string()));
    }
    for (w, h) in dose
        .map(|d| (d.width, d.height))
        .into_iter()
        .chain(mask.map(|m| (m.width, m.height)))
    {
        if (w, h) != (width, height) {
            return Err(TpsError::Imaging(format!(
                "overlay size {}x{} does not match CT slice {}x{}",
                w, h, width, height
            )));
        }
    }

    let (ct_lo, ct_hi) = slice_range(ct);
    let dose_max = dose.map(|d| slice_range(d).1).unwrap_or(0.0);

    let mut pixels = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        for col in 0..width {
            let gray = if ct_hi > ct_lo {
                (ct.get(col, row) - ct_lo) / (ct_hi - ct_lo)
            } else {
                0.0
            };
            let mut rgb = [gray * 255.0; 3];

            if let Some(d) = dose {
                let value = d.get(col, row);
                if value > 0.0 && dose_max > 0.0 {
                    let color = jet(value / dose_max);
                    for c in 0..3 {
                        rgb[c] = rgb[c] * (1.0 - DOSE_ALPHA) + color[c] as f32 * DOSE_ALPHA;
                    }
                }
            }

            if let Some(m) = mask {
                if is_edge(m, col, row) {
                    rgb = [255.0, 0.0, 0.0];
                }
            }

            pixels.extend(rgb.iter().map(|v| v.round().clamp(0.0, 255.0) as u8));
        }
    }

    encode_rgb(width as u32, height as u32, &pixels)
}

fn slice_range(slice: &Slice2D<f32>) -> (f32, f32) {
    slice
        .rows
        .iter()
        .flatten()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// 掩膜的二值轮廓：仅保留与掩膜外像素 4 邻接的边界像素
pub fn contour_outline(mask: &Slice2D<bool>) -> Slice2D<bool> {
    Slice2D {
        width: mask.width,
        height: mask.height,
        rows: (0..mask.height)
            .map(|row| (0..mask.width).map(|col| is_edge(mask, col, row)).collect())
            .collect(),
    }
}

/// 掩膜内且存在 4 邻域位于掩膜外的像素
fn is_edge(mask: &Slice2D<bool>, col: usize, row: usize) -> bool {
    if !mask.get(col, row) {
        return false;
    }
    let outside = |c: isize, r: isize| {
        c < 0
            || r < 0
            || c as usize >= mask.width
            || r as usize >= mask.height
            || !mask.get(c as usize, r as usize)
    };
    let (c, r) = (col as isize, row as isize);
    outside(c - 1, r) || outside(c + 1, r) || outside(c, r - 1) || outside(c, r + 1)
}

fn encode_rgb(width: u32, height: u32, pixels: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| TpsError::Imaging(format!("png header: {}", e)))?;
        writer
            .write_image_data(pixels)
            .map_err(|e| TpsError::Imaging(format!("png data: {}", e)))?;
        writer
            .finish()
            .map_err(|e| TpsError::Imaging(format!("png finish: {}", e)))?;
    }
    Ok(out)
}
