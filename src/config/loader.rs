use crate::config::sources::SourceConfig;
use crate::config::tracking::{RetentionConfig, SchedulerConfig, TrackingConfig};
use crate::config::{ApiConfig, LoggingConfig, StorageConfig};
use crate::error::{Error, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            storage: StorageConfig::default(),
            sources: default_sources(),
            tracking: TrackingConfig::default(),
            scheduler: SchedulerConfig::default(),
            retention: RetentionConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_sources() -> Vec<SourceConfig> {
    vec![SourceConfig::steam_store(), SourceConfig::cheapshark()]
}

impl AppConfig {
    /// Layers `config/default`, `config/{env}` and `PRICETRACKER__*` environment variables.
    pub fn load(env: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("PRICETRACKER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let app: AppConfig = config.try_deserialize()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let app: AppConfig = config.try_deserialize()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::ConfigError(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.tracking.max_batch_size == 0 {
            return Err(Error::ConfigError("tracking.max_batch_size must be positive".into()));
        }
        if self.tracking.chunk_size == 0 {
            return Err(Error::ConfigError("tracking.chunk_size must be positive".into()));
        }
        if self.tracking.stale_after_hours < 0.0 {
            return Err(Error::ConfigError(
                "tracking.stale_after_hours must not be negative".into(),
            ));
        }
        if self.scheduler.interval_hours <= 0.0 {
            return Err(Error::ConfigError("scheduler.interval_hours must be positive".into()));
        }
        if self.retention.sweep_interval_hours <= 0.0 {
            return Err(Error::ConfigError(
                "retention.sweep_interval_hours must be positive".into(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.source_id.trim().is_empty() {
                return Err(Error::ConfigError("source_id must not be empty".into()));
            }
            if !seen.insert(source.source_id.as_str()) {
                return Err(Error::ConfigError(format!(
                    "duplicate source_id {}",
                    source.source_id
                )));
            }
            if source.min_interval_secs < 0.0 || !source.min_interval_secs.is_finite() {
                return Err(Error::ConfigError(format!(
                    "source {}: min_interval_secs must be a non-negative number",
                    source.source_id
                )));
            }
            if source.retry.max_attempts == 0 {
                return Err(Error::ConfigError(format!(
                    "source {}: retry.max_attempts must be at least 1",
                    source.source_id
                )));
            }
        }
        Ok(())
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}
