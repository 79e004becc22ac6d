use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;

/// Create a connection pool from the database section of the config
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config
        .url
        .as_deref()
        .context("Database URL is not configured")?;

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .connect(url)
        .await
        .context("Failed to connect to database")
}

/// Run database migrations
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_database_config() -> DatabaseConfig {
        DatabaseConfig {
            url: Some(
                std::env::var("BOTFLOW_DATABASE__URL")
                    .unwrap_or_else(|_| "postgresql://botflow@localhost/botflow".to_string()),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    #[ignore] // Requires database to be running
    async fn test_pool_initialization() {
        let pool = create_pool(&test_database_config()).await.unwrap();
        let result: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(result.0, 1);
    }

    #[tokio::test]
    async fn test_missing_url_is_an_error() {
        let err = create_pool(&DatabaseConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
