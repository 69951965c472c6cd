//! Request/response bodies for the HTTP adapter.
//!
//! Job status responses reuse [`JobSnapshot`](crate::job::JobSnapshot)
//! directly; the shapes here exist only where the wire contract differs
//! from the core types.

use serde::{Deserialize, Serialize};

use crate::job::{DownloadOptions, JobId, JobState};

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub url: String,
    #[serde(default)]
    pub options: DownloadOptions,
    /// Opaque caller tag used for notification routing
    #[serde(default = "default_requester")]
    pub requester: String,
}

fn default_requester() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub state: JobState,
    /// True when the request attached to an already-active job instead of
    /// creating a new one
    pub deduplicated: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub state: Option<JobState>,
    /// Keyset cursor: return jobs created strictly after this id
    pub after: Option<JobId>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub downloader_version: Option<String>,
    pub downloader_error: Option<String>,
    pub queued: usize,
    pub running: usize,
    pub saturated: bool,
    pub version: String,
}
