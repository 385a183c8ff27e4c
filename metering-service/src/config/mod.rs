use crate::models::{plan_template, STARTER_PLAN};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct MeteringConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub quota_cache_ttl: Duration,
    /// `None` disables the background cache sweep; expiry is still checked on read.
    pub cache_sweep_interval: Option<Duration>,
    pub default_plan: String,
    /// When unset the engine runs on the in-memory store.
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            service_name: "metering-service".to_string(),
            quota_cache_ttl: Duration::from_secs(300),
            cache_sweep_interval: Some(Duration::from_secs(60)),
            default_plan: STARTER_PLAN.to_string(),
            database: None,
        }
    }
}

impl MeteringConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = Self::default();

        let sweep_secs: u64 = parse_env("QUOTA_CACHE_SWEEP_SECS", 60)?;
        let default_plan =
            env::var("DEFAULT_PLAN").unwrap_or_else(|_| defaults.default_plan.clone());
        if plan_template(&default_plan).is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DEFAULT_PLAN '{}' is not a known plan",
                default_plan
            )));
        }

        let database = match env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => Some(DatabaseConfig {
                url,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2)?,
            }),
            _ => None,
        };

        Ok(MeteringConfig {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            quota_cache_ttl: Duration::from_secs(parse_env("QUOTA_CACHE_TTL_SECS", 300)?),
            cache_sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            default_plan,
            database,
        })
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", key, val, e))
        }),
        Err(_) => Ok(default),
    }
}
