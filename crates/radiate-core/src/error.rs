//! 错误定义模块

use thiserror::Error;

/// 治疗计划系统统一错误类型
#[derive(Error, Debug)]
pub enum TpsError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("DICOM error: {0}")]
    Dicom(String),

    #[error("imaging error: {0}")]
    Imaging(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    NotImplemented(String),

    #[error("dose engine error: {0}")]
    DoseEngine(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TpsError {
    pub fn validation(msg: impl Into<String>) -> Self {
        TpsError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        TpsError::NotFound(msg.into())
    }
}

impl From<config::ConfigError> for TpsError {
    fn from(err: config::ConfigError) -> Self {
        TpsError::Config(err.to_string())
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for TpsError {
    fn from(err: sqlx::Error) -> Self {
        TpsError::Database(err.to_string())
    }
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, TpsError>;
