use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("scheduler.max_concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("downloader.kill_grace ({grace}) must be shorter than downloader.timeout ({timeout})")]
    GraceExceedsTimeout { grace: String, timeout: String },

    #[error("downloader.tail_lines must be at least 1")]
    ZeroTailLines,

    #[error("output.root must not be empty")]
    EmptyOutputRoot,

    #[error("retention.sweep_interval must be at least 1 second")]
    SweepIntervalTooShort,
}

pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if config.scheduler.max_concurrency == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }

    if config.downloader.kill_grace >= config.downloader.timeout {
        return Err(ValidationError::GraceExceedsTimeout {
            grace: config.downloader.kill_grace.to_string(),
            timeout: config.downloader.timeout.to_string(),
        });
    }

    if config.downloader.tail_lines == 0 {
        return Err(ValidationError::ZeroTailLines);
    }

    if config.output.root.as_os_str().is_empty() {
        return Err(ValidationError::EmptyOutputRoot);
    }

    if config.retention.sweep_interval.as_duration().as_secs() < 1 {
        return Err(ValidationError::SweepIntervalTooShort);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::HumanDuration;

    #[test]
    fn default_config_validates() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut config = Config::default();
        config.scheduler.max_concurrency = 0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::ZeroConcurrency)
        ));
    }

    #[test]
    fn rejects_grace_longer_than_timeout() {
        let mut config = Config::default();
        config.downloader.timeout = HumanDuration::from_secs(5);
        config.downloader.kill_grace = HumanDuration::from_secs(10);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::GraceExceedsTimeout { .. })
        ));
    }

    #[test]
    fn rejects_empty_output_root() {
        let mut config = Config::default();
        config.output.root = std::path::PathBuf::new();
        assert!(matches!(
            validate(&config),
            Err(ValidationError::EmptyOutputRoot)
        ));
    }
}
