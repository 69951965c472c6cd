use crate::humanize::{ByteSize, HumanDuration};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("static bind address")
}

/// External downloader (yt-dlp) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloaderConfig {
    /// Downloader binary; resolved via PATH when not absolute
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    /// yt-dlp output template, relative to the per-job directory
    #[serde(default = "default_output_template")]
    pub output_template: String,
    /// Wall-clock budget per download
    #[serde(default = "default_timeout")]
    pub timeout: HumanDuration,
    /// Grace period between SIGTERM and SIGKILL
    #[serde(default = "default_kill_grace")]
    pub kill_grace: HumanDuration,
    /// Lines of stdout/stderr retained per stream for diagnostics
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
    /// Proxy URL handed to the downloader (`--proxy`)
    #[serde(default)]
    pub proxy: Option<String>,
    /// Reject downloads larger than this (`--max-filesize`)
    #[serde(default)]
    pub max_artifact_size: Option<ByteSize>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            output_template: default_output_template(),
            timeout: default_timeout(),
            kill_grace: default_kill_grace(),
            tail_lines: default_tail_lines(),
            proxy: None,
            max_artifact_size: None,
        }
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_output_template() -> String {
    "%(title).120B [%(id)s].%(ext)s".to_string()
}

fn default_timeout() -> HumanDuration {
    HumanDuration::from_secs(300)
}

fn default_kill_grace() -> HumanDuration {
    HumanDuration::from_secs(5)
}

fn default_tail_lines() -> usize {
    40
}

/// Worker admission configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Maximum concurrently running downloads; the sole backpressure
    /// mechanism protecting the host
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Queue depth beyond which a saturated pool reports Degraded
    #[serde(default = "default_saturation_threshold")]
    pub saturation_threshold: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            saturation_threshold: default_saturation_threshold(),
        }
    }
}

fn default_max_concurrency() -> usize {
    2
}

fn default_saturation_threshold() -> usize {
    32
}

/// Artifact output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Root directory; each job writes into `<root>/<job_id>/`
    #[serde(default = "default_output_root")]
    pub root: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
        }
    }
}

fn default_output_root() -> PathBuf {
    PathBuf::from("data/artifacts")
}

/// Retention configuration for terminal jobs and their artifacts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Terminal jobs older than this are swept
    #[serde(default = "default_job_ttl")]
    pub job_ttl: HumanDuration,
    /// How often the sweep runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: HumanDuration,
    /// Keep at most this many terminal jobs regardless of age
    #[serde(default = "default_max_terminal_jobs")]
    pub max_terminal_jobs: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            job_ttl: default_job_ttl(),
            sweep_interval: default_sweep_interval(),
            max_terminal_jobs: default_max_terminal_jobs(),
        }
    }
}

fn default_job_ttl() -> HumanDuration {
    HumanDuration::from_secs(24 * 3600)
}

fn default_sweep_interval() -> HumanDuration {
    HumanDuration::from_secs(300)
}

fn default_max_terminal_jobs() -> usize {
    1000
}
