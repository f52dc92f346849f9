//! 配置管理
//!
//! 分层加载：内置默认值 -> 可选 TOML 文件 -> `RADIATE__*` 环境变量 -> `DATABASE_URL`。

use crate::error::{Result, TpsError};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// 系统完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TpsConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 存储配置
    pub storage: StorageConfig,
    /// 剂量计算配置
    pub dose: DoseConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
    /// 请求体上限（字节）
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            max_body_bytes: 500 * 1024 * 1024,
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 连接字符串
    pub url: String,
    /// 最大连接数
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://radiate_tps.db".to_string(),
            max_connections: 5,
        }
    }
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    /// 患者 JSON 镜像目录
    pub patient_dir: PathBuf,
    pub datasets_dir: PathBuf,
    pub frontend_dir: PathBuf,
    /// 已加载数据集缓存容量
    pub dataset_cache_capacity: usize,
    /// 剂量体数据缓存容量
    pub dose_cache_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("Output"),
            patient_dir: PathBuf::from("patientData"),
            datasets_dir: PathBuf::from("datasets"),
            frontend_dir: PathBuf::from("../frontend"),
            dataset_cache_capacity: 4,
            dose_cache_capacity: 8,
        }
    }
}

/// 剂量引擎类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoseEngineKind {
    Analytical,
    External,
    Disabled,
}

/// 剂量计算配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoseConfig {
    pub engine: DoseEngineKind,
    /// 靶区平均处方剂量 (Gy)
    pub prescription_gy: f64,
    pub nb_primaries: f64,
    /// DVH 评分网格间距 (mm)
    pub scoring_spacing: [f64; 3],
    pub external_command: Option<String>,
    pub external_args: Vec<String>,
    pub external_timeout_secs: u64,
    pub work_dir: PathBuf,
}

impl Default for DoseConfig {
    fn default() -> Self {
        Self {
            engine: DoseEngineKind::Analytical,
            prescription_gy: 60.0,
            nb_primaries: 1e7,
            scoring_spacing: [2.0, 2.0, 2.0],
            external_command: None,
            external_args: Vec::new(),
            external_timeout_secs: 3600,
            work_dir: PathBuf::from("Output/work"),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TpsConfig {
    /// 加载配置，`config_path` 为空时只使用默认值与环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix("RADIATE").separator("__"))
            .build()?;

        let mut config: TpsConfig = settings.try_deserialize()?;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        config.validate()?;

        info!(
            "Configuration loaded from {}",
            config_path.unwrap_or("defaults and environment")
        );
        Ok(config)
    }

    /// 校验配置的一致性
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(TpsError::Config("server.port must be non-zero".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(TpsError::Config(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.storage.dataset_cache_capacity == 0 || self.storage.dose_cache_capacity == 0 {
            return Err(TpsError::Config("cache capacities must be at least 1".to_string()));
        }
        if self.dose.scoring_spacing.iter().any(|s| *s <= 0.0) {
            return Err(TpsError::Config(
                "dose.scoring_spacing entries must be positive".to_string(),
            ));
        }
        if self.dose.engine == DoseEngineKind::External && self.dose.external_command.is_none() {
            return Err(TpsError::Config(
                "dose.external_command is required for the external engine".to_string(),
            ));
        }
        Ok(())
    }
}
