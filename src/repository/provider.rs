use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::ProviderRow;

/// Source of persisted vendor configuration rows
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// Enabled rows ordered by descending priority
    async fn enabled_providers(&self) -> Result<Vec<ProviderRow>>;

    /// One row by id, enabled or not
    async fn find_provider(&self, id: Uuid) -> Result<Option<ProviderRow>>;
}

/// Repository for `proxy_providers`
#[derive(Clone)]
pub struct ProviderRepository {
    pool: PgPool,
}

impl ProviderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProviderStore for ProviderRepository {
    async fn enabled_providers(&self) -> Result<Vec<ProviderRow>> {
        let rows = sqlx::query_as::<_, ProviderRow>(
            r#"
            SELECT id, provider_type, name, config, cost_per_gb, enabled, priority,
                   created_at, updated_at
            FROM proxy_providers
            WHERE enabled = TRUE
            ORDER BY priority DESC, name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_provider(&self, id: Uuid) -> Result<Option<ProviderRow>> {
        let row = sqlx::query_as::<_, ProviderRow>(
            r#"
            SELECT id, provider_type, name, config, cost_per_gb, enabled, priority,
                   created_at, updated_at
            FROM proxy_providers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}
