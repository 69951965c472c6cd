use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "MEDIAFETCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/mediafetch.toml";
const ENV_PREFIX: &str = "MEDIAFETCH";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;

    load_secrets(&mut config);

    Ok(config)
}

/// Proxy credentials often embed passwords, so accept them from the
/// environment even when the rest of the config lives in a TOML file.
fn load_secrets(config: &mut Config) {
    if config.downloader.proxy.is_none() {
        if let Ok(proxy) = env::var("YTDLP_PROXY") {
            config.downloader.proxy = Some(proxy);
        }
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // MEDIAFETCH__DOWNLOADER__TIMEOUT -> downloader.timeout
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
