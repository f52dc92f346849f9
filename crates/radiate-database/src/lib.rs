//! # Radiate 数据库模块
//!
//! 负责患者、CT、ROI、计划与剂量结果的持久化，提供 SQLite 连接池和完整的 CRUD 操作。

pub mod connection;
pub mod models;
pub mod queries;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use models::*;
pub use queries::{DatabaseQueries, ResultFilter};
