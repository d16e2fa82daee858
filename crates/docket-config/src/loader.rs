//! Configuration loader with layered sources.

use crate::app_config::default_environment;
use crate::AppConfig;
use config::{Config, ConfigError, Environment, File};
use docket_jobs::JobError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the environment overlay file.
pub const ENVIRONMENT_VAR: &str = "DOCKET_ENVIRONMENT";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "DOCKET";

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
    environment: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `.env` in the working directory, if present
    /// 2. `{dir}/default.toml` - Default values
    /// 3. `{dir}/{environment}.toml` - Environment-specific overrides
    /// 4. `{dir}/local.toml` - Local overrides
    /// 5. Environment variables with `DOCKET_` prefix and `__` separator,
    ///    e.g. `DOCKET_JOBS__WORKER__INTERVAL_MS=500`
    ///
    /// The environment name comes from `DOCKET_ENVIRONMENT` and defaults to
    /// `development`.
    pub fn new(config_dir: impl Into<PathBuf>) -> Result<Self, JobError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }
        let environment = std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| default_environment());
        Self::with_environment(config_dir, environment)
    }

    /// Creates a loader for an explicit environment name.
    pub fn with_environment(
        config_dir: impl Into<PathBuf>,
        environment: impl Into<String>,
    ) -> Result<Self, JobError> {
        let config_dir = config_dir.into();
        let environment = environment.into();
        let config = Self::load_config(&config_dir, &environment)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
            environment,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, JobError> {
        Self::new("./config")
    }

    /// Environment overlay in use.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from all sources.
    ///
    /// On error the previous configuration stays in place.
    pub async fn reload(&self) -> Result<(), JobError> {
        let new_config = Self::load_config(&self.config_dir, &self.environment)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    fn load_config(config_dir: &Path, environment: &str) -> Result<AppConfig, JobError> {
        info!(
            config_dir = %config_dir.display(),
            environment = %environment,
            "Loading configuration"
        );

        let mut builder = Config::builder();

        for layer in ["default", environment, "local"] {
            let path = config_dir.join(format!("{}.toml", layer));
            if path.exists() {
                debug!("Loading config from: {}", path.display());
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error)?;
        let app_config: AppConfig = config.try_deserialize().map_err(config_error)?;

        Self::validate_config(&app_config)?;

        Ok(app_config)
    }

    fn validate_config(config: &AppConfig) -> Result<(), JobError> {
        config.jobs.validate()?;

        if let Err(e) = EnvFilter::try_new(&config.logging.level) {
            return Err(JobError::Configuration(format!(
                "invalid log level `{}`: {}",
                config.logging.level, e
            )));
        }

        Ok(())
    }

    /// Gets a specific configuration value by key path.
    pub async fn get_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let config = self.config.read().await;
        let json = serde_json::to_value(&*config).ok()?;

        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }

        serde_json::from_value(current.clone()).ok()
    }
}

fn config_error(err: ConfigError) -> JobError {
    JobError::Configuration(err.to_string())
}
