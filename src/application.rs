//! Application bootstrap
//!
//! Wires the Postgres store, the HTTP adapter, and the engine together from
//! a loaded config. Instantiation does no I/O; `initialize` connects and
//! optionally migrates.

use anyhow::Result;
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::engine::Engine;
use crate::integrations::HttpAdapter;
use crate::store::PgStore;
use crate::timers::TimerScheduler;

/// A running botflow instance backed by Postgres
pub struct Application {
    pub pool: PgPool,
    pub engine: Arc<Engine>,
}

impl Application {
    /// Create a new Application instance (pure instantiation, no I/O)
    pub fn new(config: Config, pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        let engine = Engine::new(
            config,
            store.clone(),
            store.clone(),
            store,
            Arc::new(HttpAdapter::new()),
        );
        Self {
            pool,
            engine: Arc::new(engine),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        self.engine.config()
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Timer poller bound to this application's engine
    pub fn timer_scheduler(&self, shutdown_token: CancellationToken) -> TimerScheduler {
        TimerScheduler::new(self.engine.clone(), shutdown_token)
    }
}

/// Options for initializing botflow
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Database URL (overrides config file and env vars)
    pub database_url: Option<String>,

    /// Config file path (overrides default search)
    pub config_path: Option<PathBuf>,

    /// Run pending migrations before returning
    pub auto_migrate: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            database_url: None,
            config_path: None,
            auto_migrate: true,
        }
    }
}

/// Builder for constructing InitOptions
#[derive(Default)]
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.options.database_url = Some(url.into());
        self
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn auto_migrate(mut self, auto: bool) -> Self {
        self.options.auto_migrate = auto;
        self
    }

    pub async fn init(self) -> Result<Application> {
        initialize(self.options).await
    }
}

/// Load config, connect, migrate if asked, and build the application
pub async fn initialize(options: InitOptions) -> Result<Application> {
    let config = Config::builder()
        .database_url(options.database_url)
        .config_path(options.config_path)
        .build()?;
    config.require_database_url()?;

    let pool = db::create_pool(&config.database).await?;
    if options.auto_migrate {
        db::migrate(&pool).await?;
    }

    info!(channels = config.channels.len(), "Botflow initialized");
    Ok(Application::new(config, pool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_options() {
        let builder = InitBuilder::new()
            .database_url("postgresql://localhost/botflow")
            .config_path("/etc/botflow.toml")
            .auto_migrate(false);

        assert_eq!(
            builder.options.database_url.as_deref(),
            Some("postgresql://localhost/botflow")
        );
        assert_eq!(
            builder.options.config_path,
            Some(PathBuf::from("/etc/botflow.toml"))
        );
        assert!(!builder.options.auto_migrate);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore] // Requires database to be running
    async fn test_init_with_database() {
        let url = std::env::var("BOTFLOW_DATABASE__URL")
            .unwrap_or_else(|_| "postgresql://botflow@localhost/botflow".to_string());
        let app = InitBuilder::new().database_url(url).init().await.unwrap();
        assert_eq!(app.config().engine.max_hops, 100);
    }
}
