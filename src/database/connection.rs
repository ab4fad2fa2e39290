use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    /// Open a pool using the configured connection string or `DATABASE_URL`
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        let database_url = config.connection_url().ok_or_else(|| {
            StorageError::Database(
                "no connection string configured and DATABASE_URL is not set".to_string(),
            )
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&database_url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Connected durable log pool"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn into_pool(self) -> PgPool {
        self.pool
    }

    pub async fn health_check(&self) -> StorageResult<bool> {
        let row = sqlx::query("SELECT 1 as health")
            .fetch_one(&self.pool)
            .await?;

        let health: i32 = row.try_get("health")?;
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
