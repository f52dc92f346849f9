//! # Radiate Imaging
//!
//! 体数据与影像处理：体素网格、切片提取、重采样、轮廓栅格化、
//! DICOM 数据集加载、`.npy` 编解码与 PNG 渲染。

pub mod contour;
pub mod dataset;
pub mod npy;
pub mod phantom;
pub mod render;
pub mod volume;

pub use contour::{Polygon, Structure, StructureSet};
pub use dataset::{list_datasets, CtImage, Dataset, DatasetLoader, DicomDatasetLoader};
pub use phantom::Phantom;
pub use volume::{Grid, Slice2D, Volume};
