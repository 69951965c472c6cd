//! Downloader command construction.
//!
//! The argv is always a fully-resolved argument list: URLs and caller
//! options travel as discrete arguments and are never interpolated into a
//! shell string.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use url::Url;

use super::{Result, RunnerError};
use crate::config::DownloaderConfig;
use crate::job::DownloadOptions;

/// A fully-resolved subprocess invocation
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build the yt-dlp invocation for one job.
    ///
    /// `--newline --no-progress` keeps stdout line-oriented for the tail
    /// buffers; `-P` points every write at the job-scoped directory so
    /// concurrent jobs can never collide on a shared display name.
    pub fn ytdlp(
        config: &DownloaderConfig,
        url: &Url,
        options: &DownloadOptions,
        job_dir: &Path,
    ) -> Self {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--newline".to_string(),
            "--no-progress".to_string(),
            "-P".to_string(),
            job_dir.display().to_string(),
            "-o".to_string(),
            config.output_template.clone(),
        ];

        if options.audio_only {
            args.push("-x".to_string());
        }
        if let Some(format) = &options.format {
            args.push("-f".to_string());
            args.push(format.clone());
        }
        if let Some(proxy) = &config.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        if let Some(max) = config.max_artifact_size {
            args.push("--max-filesize".to_string());
            args.push(max.as_u64().to_string());
        }
        args.extend(options.extra_args.iter().cloned());

        // URL last, after every option
        args.push(url.to_string());

        Self::new(config.binary.clone(), args)
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Timeout for the `--version` probe; matches how the original service
/// probed its helper binaries.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `<binary> --version` and return the reported version line.
///
/// Used at startup and by the health check: a missing or broken binary
/// degrades the service instead of crashing the first job.
pub async fn probe_version(binary: &Path) -> Result<String> {
    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new(binary)
            .arg("--version")
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| RunnerError::ProbeTimeout {
        program: binary.to_path_buf(),
    })?
    .map_err(|source| RunnerError::Spawn {
        program: binary.to_path_buf(),
        source,
    })?;

    if !output.status.success() {
        return Err(RunnerError::ProbeFailed {
            program: binary.to_path_buf(),
            status: output.status,
        });
    }

    let version = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    Ok(version)
}
