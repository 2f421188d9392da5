use crate::error::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Apply every migration not yet recorded in `schema_migrations`; returns how many ran
pub async fn run_migrations(pool: &PgPool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let mut applied = 0;
    for (version, name, sql) in get_migrations() {
        if is_migration_applied(pool, version).await? {
            continue;
        }

        info!(version, name, "Applying migration");

        // multi-statement scripts need the simple query protocol
        let mut tx = pool.begin().await?;
        (&mut *tx).execute(sql).await?;
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(version)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        applied += 1;
        info!(version, name, "Migration applied");
    }

    Ok(applied)
}

async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .await?;

    Ok(())
}

async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Ordered `(version, name, sql)` list
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "proxy_providers", MIGRATION_001_PROXY_PROVIDERS),
        (2, "proxy_providers_priority_index", MIGRATION_002_PRIORITY_INDEX),
    ]
}

const MIGRATION_001_PROXY_PROVIDERS: &str = r#"
CREATE TABLE IF NOT EXISTS proxy_providers (
    id UUID PRIMARY KEY,
    provider_type VARCHAR(32) NOT NULL,
    name VARCHAR(255) NOT NULL,
    config JSONB NOT NULL DEFAULT '{}'::jsonb,
    cost_per_gb DOUBLE PRECISION NOT NULL DEFAULT 0,
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    priority INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT unique_provider_name UNIQUE (name)
);

CREATE OR REPLACE FUNCTION proxy_providers_touch_updated_at()
RETURNS TRIGGER AS $$
BEGIN
    NEW.updated_at = NOW();
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS proxy_providers_updated_at ON proxy_providers;
CREATE TRIGGER proxy_providers_updated_at
    BEFORE UPDATE ON proxy_providers
    FOR EACH ROW
    EXECUTE FUNCTION proxy_providers_touch_updated_at();
"#;

const MIGRATION_002_PRIORITY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_proxy_providers_enabled_priority
    ON proxy_providers (enabled, priority DESC);
CREATE INDEX IF NOT EXISTS idx_proxy_providers_type
    ON proxy_providers (provider_type);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_versions_are_strictly_increasing() {
        let migrations = get_migrations();
        for pair in migrations.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
        assert_eq!(migrations[0].0, 1);
    }

    #[test]
    fn test_provider_table_columns_match_row_model() {
        for column in [
            "id UUID",
            "provider_type",
            "config JSONB",
            "cost_per_gb DOUBLE PRECISION",
            "enabled BOOLEAN",
            "priority INTEGER",
            "updated_at TIMESTAMPTZ",
        ] {
            assert!(
                MIGRATION_001_PROXY_PROVIDERS.contains(column),
                "missing column {}",
                column
            );
        }
    }
}
