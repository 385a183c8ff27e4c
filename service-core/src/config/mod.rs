use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings shared by every service: how it logs.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_json_logs")]
    pub json_logs: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json_logs() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: default_json_logs(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
