//! 治疗计划系统服务器主程序

use anyhow::Context;
use clap::Parser;
use radiate_core::TpsConfig;
use radiate_web::{AppState, SharedState, WebServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// 服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "radiate-server")]
#[command(about = "放射治疗计划系统 HTTP 服务器")]
struct Args {
    /// 监听地址，覆盖配置文件
    #[arg(long)]
    host: Option<String>,

    /// 服务器端口，覆盖配置文件
    #[arg(short, long)]
    port: Option<u16>,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别，未指定时依次取 RUST_LOG 与配置文件
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TpsConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // 初始化日志
    let filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(filter.as_str()).init();

    info!("Starting radiate TPS server...");
    info!("  Database: {}", config.database.url);
    info!("  Datasets: {:?}", config.storage.datasets_dir);
    info!("  Output: {:?}", config.storage.output_dir);
    info!("  Dose engine: {:?}", config.dose.engine);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server.host, config.server.port))?;

    let state: SharedState = Arc::new(AppState::from_config(config).await?);
    let server = WebServer::new(addr, state);

    if let Err(e) = server.run().await {
        error!("Server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}
