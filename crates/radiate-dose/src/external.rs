//! 外部剂量计算程序适配
//!
//! 每次计算创建独立工作目录，写入 `ct.npy`/`ct.json`、`target.npy` 与
//! `plan.json`，以工作目录为最后一个参数调用外部程序，读取其输出的
//! `dose.npy`（可选 `dose.json` 描述网格，否则视为 CT 网格）。

use crate::engine::{DoseEngine, DoseRequest};
use async_trait::async_trait;
use radiate_core::{Result, TpsError};
use radiate_imaging::{npy, Grid, Volume};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// 外部剂量引擎
#[derive(Debug, Clone)]
pub struct ExternalDoseEngine {
    command: String,
    args: Vec<String>,
    work_dir: PathBuf,
    timeout: Duration,
}

impl ExternalDoseEngine {
    pub fn new(command: String, args: Vec<String>, work_dir: PathBuf, timeout_secs: u64) -> Self {
        Self {
            command,
            args,
            work_dir,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 创建本次计算的工作目录，随返回的守卫一起删除
    async fn run_dir(&self) -> Result<tempfile::TempDir> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let work_dir = self.work_dir.clone();
        blocking(move || Ok(tempfile::Builder::new().prefix("dose-").tempdir_in(work_dir)?)).await
    }

    async fn run(&self, dir: &Path, request: &DoseRequest) -> Result<Volume<f32>> {
        let inputs = request.clone();
        let input_dir = dir.to_path_buf();
        blocking(move || write_inputs(&input_dir, &inputs)).await?;

        info!("Running external dose engine {} in {:?}", self.command, dir);
        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(dir)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Err(_) => Err(TpsError::DoseEngine(format!(
                "external engine timed out after {}s",
                self.timeout.as_secs()
            ))),
            Ok(Err(e)) => Err(TpsError::DoseEngine(format!(
                "failed to start {}: {}",
                self.command, e
            ))),
            Ok(Ok(output)) if !output.status.success() => Err(TpsError::DoseEngine(format!(
                "external engine exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Ok(Ok(_)) => {
                let output_dir = dir.to_path_buf();
                let ct_grid = *request.ct.grid();
                blocking(move || read_output(&output_dir, &ct_grid)).await
            }
        }
    }
}

/// 在阻塞线程池中执行文件编解码
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TpsError::DoseEngine(format!("dose task failed: {}", e)))?
}

fn write_inputs(dir: &Path, request: &DoseRequest) -> Result<()> {
    let grid = request.ct.grid();
    std::fs::write(dir.join("ct.npy"), npy::encode_f32(&grid.shape, request.ct.data())?)?;
    std::fs::write(dir.join("ct.json"), serde_json::to_vec_pretty(grid)?)?;

    if let Some(target) = &request.target {
        let values: Vec<f32> = target.data().iter().map(|v| if *v { 1.0 } else { 0.0 }).collect();
        std::fs::write(dir.join("target.npy"), npy::encode_f32(&grid.shape, &values)?)?;
    }
    std::fs::write(dir.join("plan.json"), serde_json::to_vec_pretty(&request.beams)?)?;
    Ok(())
}

fn read_output(dir: &Path, ct_grid: &Grid) -> Result<Volume<f32>> {
    let bytes = std::fs::read(dir.join("dose.npy")).map_err(|e| {
        TpsError::DoseEngine(format!("external engine produced no dose.npy: {}", e))
    })?;
    let array = npy::decode(&bytes)?;
    let shape: [usize; 3] = array.shape.as_slice().try_into().map_err(|_| {
        TpsError::DoseEngine(format!("dose.npy must be 3-D, got shape {:?}", array.shape))
    })?;

    let grid = match std::fs::read(dir.join("dose.json")) {
        Ok(raw) => serde_json::from_slice::<Grid>(&raw)?,
        Err(_) => Grid::new(shape, ct_grid.spacing, ct_grid.origin),
    };
    if grid.shape != shape {
        return Err(TpsError::DoseEngine(format!(
            "dose.json shape {:?} does not match dose.npy shape {:?}",
            grid.shape, shape
        )));
    }

    let dose = Volume::new(grid, array.data)?;
    Ok(if grid == *ct_grid {
        dose
    } else {
        debug!("Resampling external dose from {:?} onto CT grid", grid.shape);
        dose.resample_linear(ct_grid, 0.0)
    })
}

#[async_trait]
impl DoseEngine for ExternalDoseEngine {
    fn name(&self) -> &str {
        "external"
    }

    async fn compute(&self, request: &DoseRequest) -> Result<Volume<f32>> {
        request.beams.validate()?;
        let run_dir = self.run_dir().await?;
        let dir = run_dir.path().to_path_buf();

        let result = self.run(&dir, request).await;

        if let Err(e) = blocking(move || Ok(run_dir.close()?)).await {
            warn!("Failed to clean up dose work dir {:?}: {}", dir, e);
        }
        result
    }
}
