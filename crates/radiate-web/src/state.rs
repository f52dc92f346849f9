//! 共享应用状态

use radiate_core::utils::validate_dataset_name;
use radiate_core::{Result, TpsConfig, TpsError};
use radiate_database::{DatabasePool, DatabaseQueries};
use radiate_dose::{build_engine, DoseEngine};
use radiate_imaging::{Dataset, DatasetLoader, DicomDatasetLoader, Volume};
use radiate_storage::{StorageManager, VolumeCache};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub type SharedState = Arc<AppState>;

/// 各处理器共享的服务句柄
pub struct AppState {
    pub config: TpsConfig,
    pub db: DatabasePool,
    pub storage: StorageManager,
    /// 为空时所有依赖数据集的接口返回 503
    pub loader: Option<Arc<dyn DatasetLoader>>,
    /// 为空时剂量接口返回 503
    pub engine: Option<Arc<dyn DoseEngine>>,
    /// 已加载数据集，按目录缓存
    pub datasets: VolumeCache<PathBuf, Dataset>,
    /// CT 网格上的剂量分布，按 CT id 缓存
    pub doses: VolumeCache<i64, Volume<f32>>,
}

impl AppState {
    pub fn new(
        config: TpsConfig,
        db: DatabasePool,
        storage: StorageManager,
        loader: Option<Arc<dyn DatasetLoader>>,
        engine: Option<Arc<dyn DoseEngine>>,
    ) -> Self {
        let datasets = VolumeCache::new(config.storage.dataset_cache_capacity);
        let doses = VolumeCache::new(config.storage.dose_cache_capacity);
        Self {
            config,
            db,
            storage,
            loader,
            engine,
            datasets,
            doses,
        }
    }

    /// 按配置连接数据库、建表、创建目录并选择剂量引擎
    pub async fn from_config(config: TpsConfig) -> Result<Self> {
        let db = DatabasePool::from_config(&config.database).await?;
        DatabaseQueries::new(&db).create_tables().await?;
        info!("Database initialized");

        let storage = StorageManager::from_config(&config.storage);
        storage.ensure_dirs().await?;

        let engine = build_engine(&config.dose)?;
        let loader: Arc<dyn DatasetLoader> = Arc::new(DicomDatasetLoader::new());
        Ok(Self::new(config, db, storage, Some(loader), engine))
    }

    pub fn queries(&self) -> DatabaseQueries<'_> {
        DatabaseQueries::new(&self.db)
    }

    /// 数据集名称对应的目录
    pub fn dataset_path(&self, name: &str) -> Result<PathBuf> {
        validate_dataset_name(name)?;
        Ok(self.config.storage.datasets_dir.join(name))
    }

    pub fn require_engine(&self) -> Result<Arc<dyn DoseEngine>> {
        self.engine
            .clone()
            .ok_or_else(|| TpsError::Unavailable("Dose computation is not available".to_string()))
    }

    pub fn require_loader(&self) -> Result<Arc<dyn DatasetLoader>> {
        self.loader
            .clone()
            .ok_or_else(|| TpsError::Unavailable("DICOM dataset loading is not available".to_string()))
    }

    /// 加载数据集，命中缓存时直接返回
    pub async fn load_dataset(&self, dir: &Path) -> Result<Arc<Dataset>> {
        let loader = self.require_loader()?;
        let key = dir.to_path_buf();
        if let Some(dataset) = self.datasets.get(&key).await {
            return Ok(dataset);
        }
        if !tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(TpsError::not_found(format!("Dataset path not found: {}", dir.display())));
        }

        let path = key.clone();
        let dataset = tokio::task::spawn_blocking(move || loader.load(&path))
            .await
            .map_err(|e| TpsError::Internal(format!("dataset task failed: {}", e)))??;

        info!(
            "Loaded dataset {:?}: ct={}, structures={}, dose={}",
            dir,
            dataset.ct.is_some(),
            dataset.roi_names().len(),
            dataset.dose.is_some()
        );
        Ok(self.datasets.insert(key, Arc::new(dataset)).await)
    }

    /// 上传目录变化后丢弃旧的缓存结果
    pub async fn forget_dataset(&self, dir: &Path) {
        self.datasets.invalidate(&dir.to_path_buf()).await;
    }
}
