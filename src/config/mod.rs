//! Configuration management for mediafetch
//!
//! Layered configuration: struct defaults, then a TOML file, then
//! environment variables (highest priority).
//!
//! # Environment Variables
//!
//! Settings can be overridden with the pattern `MEDIAFETCH__<section>__<key>`:
//!
//! - `MEDIAFETCH__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `MEDIAFETCH__SCHEDULER__MAX_CONCURRENCY=4`
//! - `MEDIAFETCH__DOWNLOADER__TIMEOUT=10m`
//!
//! # Configuration File
//!
//! By default the configuration is loaded from `config/mediafetch.toml`;
//! override the path with the `MEDIAFETCH_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{
    Config, DownloaderConfig, OutputConfig, RetentionConfig, SchedulerConfig, ServerConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or
    /// validation fails (zero concurrency, grace >= timeout, ...).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"

[downloader]
binary = "yt-dlp"
output_template = "%(title).120B [%(id)s].%(ext)s"
timeout = "5m"
kill_grace = "5s"
tail_lines = 40
proxy = "http://proxy:8080"
max_artifact_size = "2GB"

[scheduler]
max_concurrency = 2
saturation_threshold = 32

[output]
root = "data/artifacts"

[retention]
job_ttl = "1d"
sweep_interval = "5m"
max_terminal_jobs = 500
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.downloader.proxy.as_deref(), Some("http://proxy:8080"));
        assert_eq!(config.retention.max_terminal_jobs, 500);
        assert_eq!(config.retention.job_ttl.as_duration().as_secs(), 86400);
    }

    #[test]
    fn validation_catches_bad_values() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[scheduler]\nmax_concurrency = 0\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result,
            Err(ConfigError::ValidationError(ValidationError::ZeroConcurrency))
        ));
    }
}
