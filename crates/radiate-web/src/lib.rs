//! # Radiate Web
//!
//! 治疗计划系统的 HTTP 接口：患者、CT、ROI、计划与剂量管理，
//! 以及数据集浏览、DICOM 上传和前端静态文件。

pub mod error;
pub mod handlers;
pub mod server;
pub mod state;
pub mod static_files;

pub use error::{ApiError, ApiResult};
pub use server::{create_app, WebServer};
pub use state::{AppState, SharedState};
