//! 数据库连接管理

use radiate_core::config::DatabaseConfig;
use radiate_core::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// 数据库连接池
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// 连接数据库，文件不存在时自动创建并开启外键约束
    ///
    /// 内存数据库只使用一个常驻连接，否则每个连接各自看到一个空库。
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        };

        let pool = pool_options.connect_with(options).await?;
        info!("Connected to database {}", url);
        Ok(Self { pool })
    }

    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::connect(&config.url, config.max_connections).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
