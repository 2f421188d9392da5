use crate::config::Config;
use crate::error::{BrokerError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// PostgreSQL pool holding the provider configuration store
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect using the `DB_*` settings
    pub async fn new(config: &Config) -> Result<Self> {
        info!(
            host = %config.database.host,
            port = %config.database.port,
            database = %config.database.name,
            max_connections = config.database.max_connections,
            "Connecting to provider config database"
        );

        let pool = PgPoolOptions::new()
            .min_connections(config.database.min_connections)
            .max_connections(config.database.max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(30 * 60))
            .max_lifetime(Duration::from_secs(60 * 60))
            .connect(&config.database_url())
            .await
            .map_err(|e| BrokerError::DatabaseConnection(e.to_string()))?;

        let db = Database { pool };
        let latency = db.health_check().await?;
        info!(latency_ms = latency.as_millis() as u64, "Database connection pool established");

        Ok(db)
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query and report its latency
    pub async fn health_check(&self) -> Result<Duration> {
        let start = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(start.elapsed())
    }

    pub fn pool_stats(&self) -> ConnectionPoolStats {
        ConnectionPoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle() as u32,
        }
    }

    /// Apply pending schema migrations
    pub async fn run_migrations(&self) -> Result<()> {
        let applied = super::migrations::run_migrations(&self.pool).await?;
        info!(applied, "Database migrations completed");
        Ok(())
    }

    pub async fn close(&self) {
        let stats = self.pool_stats();
        debug!(size = stats.size, idle = stats.idle, "Closing database connection pool");
        self.pool.close().await;
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, Copy)]
pub struct ConnectionPoolStats {
    pub size: u32,
    pub idle: u32,
}
