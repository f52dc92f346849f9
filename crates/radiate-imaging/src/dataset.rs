//! DICOM 数据集加载
//!
//! 一个数据集是一个目录，包含一套 CT 序列、可选的 RTSTRUCT 结构集以及
//! 可选的 RTDOSE 剂量分布。无法解析的文件会被跳过。

use crate::contour::{Polygon, Structure, StructureSet};
use crate::volume::{Grid, Volume};
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::{open_file, InMemDicomObject};
use radiate_core::{Result, TpsError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// CT 影像
#[derive(Debug, Clone)]
pub struct CtImage {
    pub name: String,
    pub patient_id: Option<String>,
    pub volume: Arc<Volume<f32>>,
}

/// 已加载的数据集
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub ct: Option<CtImage>,
    pub structures: Option<StructureSet>,
    pub dose: Option<Arc<Volume<f32>>>,
}

impl Dataset {
    pub fn roi_names(&self) -> Vec<String> {
        self.structures
            .as_ref()
            .map(|s| s.names())
            .unwrap_or_default()
    }
}

/// 数据集加载器
///
/// 同步接口，调用方在阻塞线程池中执行。
pub trait DatasetLoader: Send + Sync {
    fn load(&self, dir: &Path) -> Result<Dataset>;
}

/// 基于 dicom-rs 的数据集加载器
#[derive(Debug, Default, Clone)]
pub struct DicomDatasetLoader;

impl DicomDatasetLoader {
    pub fn new() -> Self {
        Self
    }
}

impl DatasetLoader for DicomDatasetLoader {
    fn load(&self, dir: &Path) -> Result<Dataset> {
        if !dir.is_dir() {
            return Err(TpsError::not_found(format!(
                "Dataset path not found: {}",
                dir.display()
            )));
        }
        info!("Loading DICOM dataset from {:?}", dir);

        let mut ct_slices = Vec::new();
        let mut ct_name = None;
        let mut patient_id = None;
        let mut structures = None;
        let mut dose = None;

        for path in collect_files(dir)? {
            let obj = match open_file(&path) {
                Ok(obj) => obj,
                Err(e) => {
                    debug!("Skipping non-DICOM file {:?}: {}", path, e);
                    continue;
                }
            };
            let modality = str_of(&obj, tags::MODALITY).unwrap_or_default();
            match modality.as_str() {
                "CT" => match read_ct_slice(&obj) {
                    Ok(slice) => {
                        if ct_name.is_none() {
                            ct_name = str_of(&obj, tags::SERIES_DESCRIPTION);
                            patient_id = str_of(&obj, tags::PATIENT_ID);
                        }
                        ct_slices.push(slice);
                    }
                    Err(e) => warn!("Skipping CT file {:?}: {}", path, e),
                },
                "RTSTRUCT" if structures.is_none() => {
                    structures = Some(read_structure_set(&obj));
                }
                "RTDOSE" if dose.is_none() => match read_dose(&obj) {
                    Ok(volume) => dose = Some(Arc::new(volume)),
                    Err(e) => warn!("Skipping RTDOSE file {:?}: {}", path, e),
                },
                other => debug!("Ignoring {:?} with modality {:?}", path, other),
            }
        }

        let ct = if ct_slices.is_empty() {
            None
        } else {
            let volume = assemble_ct(ct_slices)?;
            info!("Loaded CT volume with shape {:?}", volume.shape());
            Some(CtImage {
                name: ct_name.unwrap_or_else(|| "CT".to_string()),
                patient_id,
                volume: Arc::new(volume),
            })
        };

        Ok(Dataset {
            ct,
            structures,
            dose,
        })
    }
}

/// 列出数据集根目录下的子目录
pub fn list_datasets(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        warn!("Datasets directory {:?} does not exist", root);
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

// ========== 元素读取 ==========

fn str_of(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn int_of(obj: &InMemDicomObject, tag: Tag) -> Option<i64> {
    obj.element(tag).ok().and_then(|e| e.to_int::<i64>().ok())
}

fn float_of(obj: &InMemDicomObject, tag: Tag) -> Option<f64> {
    obj.element(tag).ok().and_then(|e| e.to_float64().ok())
}

fn floats_of(obj: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    obj.element(tag).ok().and_then(|e| e.to_multi_float64().ok())
}

fn items_of(obj: &InMemDicomObject, tag: Tag) -> &[InMemDicomObject] {
    obj.element(tag)
        .ok()
        .and_then(|e| e.items())
        .unwrap_or(&[])
}

fn required<T>(value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| TpsError::Dicom(format!("missing {}", what)))
}

/// Rows/Columns 等为 US 类型，超出该范围的值来自损坏文件
const MAX_DIMENSION: usize = u16::MAX as usize;

/// 图像维度须在 `1..=MAX_DIMENSION` 内
fn dimension(value: i64, what: &str) -> Result<usize> {
    usize::try_from(value)
        .ok()
        .filter(|v| (1..=MAX_DIMENSION).contains(v))
        .ok_or_else(|| TpsError::validation(format!("invalid {} {}", what, value)))
}

/// 像素总数，溢出视为损坏文件
fn pixel_count(dims: &[usize]) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .ok_or_else(|| TpsError::validation(format!("image dimensions {:?} are too large", dims)))
}

// ========== CT ==========

/// 单张 CT 切片，像素值已换算为 HU
#[derive(Debug, Clone)]
pub(crate) struct CtSlice {
    pub position: [f64; 3],
    /// DICOM PixelSpacing：`[行间距(y), 列间距(x)]`
    pub pixel_spacing: [f64; 2],
    pub rows: usize,
    pub columns: usize,
    pub thickness: Option<f64>,
    pub values: Vec<f32>,
}

fn read_ct_slice(obj: &InMemDicomObject) -> Result<CtSlice> {
    let rows = dimension(required(int_of(obj, tags::ROWS), "Rows")?, "Rows")?;
    let columns = dimension(required(int_of(obj, tags::COLUMNS), "Columns")?, "Columns")?;
    let position = required(floats_of(obj, tags::IMAGE_POSITION_PATIENT), "ImagePositionPatient")?;
    let spacing = required(floats_of(obj, tags::PIXEL_SPACING), "PixelSpacing")?;
    if position.len() < 3 || spacing.len() < 2 {
        return Err(TpsError::Dicom("malformed geometry attributes".to_string()));
    }
    let values = read_pixels(obj, pixel_count(&[rows, columns])?)?;

    Ok(CtSlice {
        position: [position[0], position[1], position[2]],
        pixel_spacing: [spacing[0], spacing[1]],
        rows,
        columns,
        thickness: float_of(obj, tags::SLICE_THICKNESS),
        values,
    })
}

fn read_pixels(obj: &InMemDicomObject, count: usize) -> Result<Vec<f32>> {
    let bits = int_of(obj, tags::BITS_ALLOCATED).unwrap_or(16) as u16;
    let signed = int_of(obj, tags::PIXEL_REPRESENTATION).unwrap_or(0) == 1;
    let slope = float_of(obj, tags::RESCALE_SLOPE).unwrap_or(1.0);
    let intercept = float_of(obj, tags::RESCALE_INTERCEPT).unwrap_or(0.0);
    let bytes = obj
        .element(tags::PIXEL_DATA)
        .map_err(|_| TpsError::Dicom("missing PixelData".to_string()))?
        .to_bytes()
        .map_err(|_| TpsError::Dicom("compressed pixel data is not supported".to_string()))?;
    decode_pixels(&bytes, bits, signed, count, slope, intercept)
}

/// 按位深与符号解码小端像素并做线性换算
pub(crate) fn decode_pixels(
    bytes: &[u8],
    bits_allocated: u16,
    signed: bool,
    count: usize,
    slope: f64,
    intercept: f64,
) -> Result<Vec<f32>> {
    let width = match bits_allocated {
        8 => 1,
        16 => 2,
        32 => 4,
        other => {
            return Err(TpsError::Dicom(format!("unsupported BitsAllocated {}", other)));
        }
    };
    let needed = count
        .checked_mul(width)
        .ok_or_else(|| TpsError::Dicom(format!("pixel count {} is too large", count)))?;
    if bytes.len() < needed {
        return Err(TpsError::Dicom(format!(
            "pixel data has {} bytes, expected {}",
            bytes.len(),
            needed
        )));
    }
    let raw = bytes[..needed].chunks_exact(width).map(|b| match (width, signed) {
        (1, false) => b[0] as f64,
        (1, true) => b[0] as i8 as f64,
        (2, false) => u16::from_le_bytes([b[0], b[1]]) as f64,
        (2, true) => i16::from_le_bytes([b[0], b[1]]) as f64,
        (_, false) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
        (_, true) => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
    });
    Ok(raw.map(|v| (v * slope + intercept) as f32).collect())
}

/// 按 z 位置排序切片并拼装为体数据
pub(crate) fn assemble_ct(mut slices: Vec<CtSlice>) -> Result<Volume<f32>> {
    if slices.is_empty() {
        return Err(TpsError::Dicom("no CT slices".to_string()));
    }
    slices.sort_by(|a, b| a.position[2].total_cmp(&b.position[2]));

    let (rows, columns) = (slices[0].rows, slices[0].columns);
    if slices.iter().any(|s| s.rows != rows || s.columns != columns) {
        return Err(TpsError::Dicom("CT slices have inconsistent dimensions".to_string()));
    }

    let dz = if slices.len() > 1 {
        (slices[1].position[2] - slices[0].position[2]).abs()
    } else {
        0.0
    };
    let dz = if dz > 0.0 {
        dz
    } else {
        slices[0].thickness.filter(|t| *t > 0.0).unwrap_or(1.0)
    };

    let grid = Grid::new(
        [columns, rows, slices.len()],
        [slices[0].pixel_spacing[1], slices[0].pixel_spacing[0], dz],
        slices[0].position,
    );
    grid.validate()?;
    Ok(Volume::from_fn(grid, |[x, y, z]| slices[z].values[y * columns + x]))
}

// ========== RTSTRUCT ==========

fn read_structure_set(obj: &InMemDicomObject) -> StructureSet {
    let mut structures: Vec<Structure> = items_of(obj, tags::STRUCTURE_SET_ROI_SEQUENCE)
        .iter()
        .filter_map(|item| {
            let number = int_of(item, tags::ROI_NUMBER)? as i32;
            let name = str_of(item, tags::ROI_NAME)?;
            Some(Structure {
                number,
                name,
                color: None,
                polygons: Vec::new(),
            })
        })
        .collect();

    let by_number: HashMap<i32, usize> = structures
        .iter()
        .enumerate()
        .map(|(i, s)| (s.number, i))
        .collect();

    for item in items_of(obj, tags::ROI_CONTOUR_SEQUENCE) {
        let Some(index) = int_of(item, tags::REFERENCED_ROI_NUMBER)
            .and_then(|n| by_number.get(&(n as i32)).copied())
        else {
            continue;
        };
        let structure = &mut structures[index];
        structure.color = item
            .element(tags::ROI_DISPLAY_COLOR)
            .ok()
            .and_then(|e| e.to_multi_int::<i32>().ok())
            .filter(|c| c.len() >= 3)
            .map(|c| [c[0].clamp(0, 255) as u8, c[1].clamp(0, 255) as u8, c[2].clamp(0, 255) as u8]);
        for contour in items_of(item, tags::CONTOUR_SEQUENCE) {
            if let Some(data) = floats_of(contour, tags::CONTOUR_DATA) {
                structure.polygons.push(Polygon {
                    points: data.chunks_exact(3).map(|p| [p[0], p[1], p[2]]).collect(),
                });
            }
        }
    }

    debug!("Read structure set with {} structures", structures.len());
    StructureSet {
        label: str_of(obj, tags::STRUCTURE_SET_LABEL),
        structures,
    }
}

// ========== RTDOSE ==========

fn read_dose(obj: &InMemDicomObject) -> Result<Volume<f32>> {
    let rows = dimension(required(int_of(obj, tags::ROWS), "Rows")?, "Rows")?;
    let columns = dimension(required(int_of(obj, tags::COLUMNS), "Columns")?, "Columns")?;
    let frames = match int_of(obj, tags::NUMBER_OF_FRAMES) {
        Some(n) => usize::try_from(n.max(1))
            .map_err(|_| TpsError::validation(format!("invalid NumberOfFrames {}", n)))?,
        None => 1,
    };
    let position = required(floats_of(obj, tags::IMAGE_POSITION_PATIENT), "ImagePositionPatient")?;
    let spacing = required(floats_of(obj, tags::PIXEL_SPACING), "PixelSpacing")?;
    if position.len() < 3 || spacing.len() < 2 {
        return Err(TpsError::Dicom("malformed geometry attributes".to_string()));
    }
    let offsets = floats_of(obj, tags::GRID_FRAME_OFFSET_VECTOR).unwrap_or_default();
    let dz = match offsets.as_slice() {
        [a, b, ..] if (b - a).abs() > 0.0 => (b - a).abs(),
        _ => float_of(obj, tags::SLICE_THICKNESS).unwrap_or(1.0),
    };
    let scaling = float_of(obj, tags::DOSE_GRID_SCALING).unwrap_or(1.0);

    let bits = int_of(obj, tags::BITS_ALLOCATED).unwrap_or(32) as u16;
    let signed = int_of(obj, tags::PIXEL_REPRESENTATION).unwrap_or(0) == 1;
    let bytes = obj
        .element(tags::PIXEL_DATA)
        .map_err(|_| TpsError::Dicom("missing PixelData".to_string()))?
        .to_bytes()
        .map_err(|_| TpsError::Dicom("compressed pixel data is not supported".to_string()))?;
    let values = decode_pixels(&bytes, bits, signed, pixel_count(&[rows, columns, frames])?, scaling, 0.0)?;

    let origin_z = position[2] + offsets.first().copied().unwrap_or(0.0);
    let grid = Grid::new(
        [columns, rows, frames],
        [spacing[1], spacing[0], dz],
        [position[0], position[1], origin_z],
    );
    grid.validate()?;
    Ok(Volume::from_fn(grid, |[x, y, z]| values[(z * rows + y) * columns + x]))
}
