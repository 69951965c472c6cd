//! Job data model for the download orchestration core.
//!
//! A [`Job`] tracks one requested download from submission to a terminal
//! state. Concurrent requests for the same media collapse onto one job via
//! the dedup key (see [`dedup`]); the extra callers are recorded as
//! followers and share the terminal outcome.
//!
//! State machine:
//!
//! ```text
//! Queued -> Running -> { Succeeded, Failed, TimedOut, Cancelled }
//!        \-----------------------------------------^ (cancel while queued)
//! ```
//!
//! The four right-hand states are terminal. A terminal job carries exactly
//! one of an artifact path (Succeeded) or an [`ErrorDetail`] (everything
//! else), never neither and never both.

pub mod dedup;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;
use uuid::Uuid;

pub use dedup::DedupKey;

/// Job identifier. UUIDv7, so iteration order is creation order.
pub type JobId = Uuid;

/// Downloader options passed through to the yt-dlp invocation.
///
/// Opaque to the orchestration core apart from participating in the dedup
/// key: two requests with different options are different downloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    /// Format selector handed to `-f` (e.g. "bestvideo+bestaudio")
    #[serde(default)]
    pub format: Option<String>,
    /// Extract audio only (`-x`)
    #[serde(default)]
    pub audio_only: bool,
    /// Extra arguments appended verbatim before the URL
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// An accepted download request. Immutable once created.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub source_url: Url,
    pub options: DownloadOptions,
    /// Opaque tag identifying the caller, used for notification routing
    pub requester: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure classification carried alongside the human-readable detail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// Downloader binary missing or not executable
    Spawn,
    /// Downloader ran and reported failure (network error, unsupported URL, ...)
    Runtime,
    /// Wall-clock budget exceeded, process terminated
    Timeout,
    /// Cancelled by the caller
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: FailureCode,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Registry-owned job record. Only the registry mutates these; everyone
/// else sees [`JobSnapshot`] clones.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub dedup_key: DedupKey,
    pub state: JobState,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub artifact: Option<PathBuf>,
    pub error: Option<ErrorDetail>,
    pub request: DownloadRequest,
    /// Requester tags sharing this job's outcome; includes the originator
    pub followers: Vec<String>,
}

impl JobRecord {
    pub fn new(request: DownloadRequest, dedup_key: DedupKey) -> Self {
        let followers = vec![request.requester.clone()];
        Self {
            id: Uuid::now_v7(),
            dedup_key,
            state: JobState::Queued,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            artifact: None,
            error: None,
            request,
            followers,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            state: self.state,
            url: self.request.source_url.to_string(),
            requester: self.request.requester.clone(),
            followers: self.followers.clone(),
            cancel_requested: self.cancel_requested,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            artifact: self.artifact.clone(),
            error: self.error.clone(),
        }
    }
}

/// Read-only view of a job handed to the API layer, sinks, and tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub state: JobState,
    pub url: String,
    pub requester: String,
    pub followers: Vec<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub artifact: Option<PathBuf>,
    pub error: Option<ErrorDetail>,
}
