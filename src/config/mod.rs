//! Configuration management for mediaq
//!
//! Every setting is resolved with the following priority:
//! 1. Environment variable (when set and non-empty), including values loaded
//!    from `.env` by [`load_dotenv`]
//! 2. Configuration file value at `[section][key]`
//!
//! A key missing from both is a hard error naming the section and key.
//!
//! # Usage
//!
//! ```no_run
//! use mediaq::config::Settings;
//!
//! let settings = Settings::load(None).expect("Failed to load configuration");
//! println!("Queue: {}", settings.broker.queue);
//! ```
//!
//! # Environment Variables
//!
//! - `RABBITMQ_HOST`, `RABBITMQ_PORT`, `RABBITMQ_USER`, `RABBITMQ_PASS`,
//!   `RABBITMQ_VHOST`, `RABBITMQ_QUEUE`
//! - `DOWNLOADER_PATH`
//!
//! # Configuration File
//!
//! By default the file is `config.yml` in the working directory. This can be
//! overridden with `--config` or the `MEDIAQ_CONFIG` environment variable.

mod models;
mod resolver;
mod sources;
mod validation;

pub use models::{
    BrokerSettings, DOWNLOADER_PATH, DownloaderSettings, RABBITMQ_HOST, RABBITMQ_PASS,
    RABBITMQ_PORT, RABBITMQ_QUEUE, RABBITMQ_USER, RABBITMQ_VHOST, REQUIRED_KEYS, SettingKey,
    Settings,
};
pub use resolver::{Resolver, ResolverError};
pub use sources::{CONFIG_ENV_VAR, DEFAULT_CONFIG_PATH, EnvSource, FileSource, load_dotenv};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("{0}")]
    ResolverError(#[from] ResolverError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Settings {
    /// Load settings from the process environment and the config file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration file exists but is malformed
    /// - A required key is set neither in the environment nor in the file
    /// - A value fails validation
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let env = EnvSource::from_process();
        let path = sources::config_path(config_path, &env);
        let file = FileSource::load(&path)?;
        Self::resolve(&env, &file)
    }

    /// Resolve settings from explicit sources
    pub fn resolve(env: &EnvSource, file: &FileSource) -> Result<Self, ConfigError> {
        let settings = Resolver::new(env, file).settings()?;
        validation::validate(&settings)?;
        Ok(settings)
    }
}
