//! Engine assembly from configuration.

use crate::config::MeteringConfig;
use crate::error::MeteringError;
use crate::services::{
    init_metrics, GovernorRateLimiter, InMemoryUsageStore, MeteringService, PgUsageStore,
    RateLimiter, UsageStore,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A wired engine plus the background task that keeps its cache tidy.
pub struct Application {
    service: Arc<MeteringService>,
    sweeper: Option<JoinHandle<()>>,
}

impl Application {
    /// Build the engine, connecting to PostgreSQL and running migrations when
    /// a database is configured.
    pub async fn build(config: MeteringConfig) -> Result<Self, MeteringError> {
        Self::build_internal(config, true).await
    }

    /// Build without running migrations, for harnesses that apply them.
    pub async fn build_without_migrations(config: MeteringConfig) -> Result<Self, MeteringError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: MeteringConfig,
        run_migrations: bool,
    ) -> Result<Self, MeteringError> {
        init_metrics();

        let store: Arc<dyn UsageStore> = match &config.database {
            Some(db) => {
                let pg = PgUsageStore::new(&db.url, db.max_connections, db.min_connections)
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                        e
                    })?;
                if run_migrations {
                    pg.run_migrations().await.map_err(|e| {
                        tracing::error!(error = %e, "Failed to run migrations");
                        e
                    })?;
                }
                Arc::new(pg)
            }
            None => {
                tracing::info!("No database configured, using in-memory usage store");
                Arc::new(InMemoryUsageStore::new())
            }
        };

        let rate_limiter: Arc<dyn RateLimiter> = Arc::new(GovernorRateLimiter::new());
        let service = Arc::new(MeteringService::from_config(
            &config,
            store,
            Some(rate_limiter),
        )?);

        let sweeper = config
            .cache_sweep_interval
            .map(|every| service.spawn_cache_sweeper(every));

        tracing::info!(
            service_name = %config.service_name,
            default_plan = %config.default_plan,
            cache_ttl_secs = config.quota_cache_ttl.as_secs(),
            persistent = config.database.is_some(),
            "Metering engine ready"
        );

        Ok(Self { service, sweeper })
    }

    pub fn service(&self) -> Arc<MeteringService> {
        self.service.clone()
    }

    /// Stop the cache sweeper. Dropping the engine stops it too.
    pub fn shutdown(mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Load configuration from the environment and install logging.
pub fn load_config() -> Result<MeteringConfig, AppError> {
    let config = MeteringConfig::from_env()?;
    init_tracing(
        &config.service_name,
        &config.common.log_level,
        config.common.json_logs,
    );
    Ok(config)
}
