//! # Radiate 存储模块
//!
//! 负责剂量体数据、渲染图像和患者 JSON 镜像的落盘，以及体数据缓存。

pub mod cache;
pub mod storage;

pub use cache::VolumeCache;
pub use storage::*;
