//! Result/notification sinks.
//!
//! The orchestrator reports every job exactly once, at the moment it
//! reaches a terminal state, through the [`NotificationSink`] interface.
//! Which transport that maps to (nothing, a log line, a push channel a bot
//! adapter drains) is chosen at construction time; the orchestrator never
//! sees a concrete transport.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::job::{ErrorDetail, JobId, JobSnapshot, JobState};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Invoked exactly once per job when it reaches a terminal state.
    /// The snapshot carries the follower list; fan-out is the sink's call.
    async fn on_terminal(&self, job: &JobSnapshot);
}

/// Sink for polling deployments: completion is observed via status queries,
/// so terminal notifications go nowhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn on_terminal(&self, _job: &JobSnapshot) {}
}

/// Sink that records terminal jobs in the structured log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn on_terminal(&self, job: &JobSnapshot) {
        info!(
            job_id = %job.id,
            state = %job.state,
            url = %job.url,
            followers = job.followers.len(),
            artifact = job.artifact.as_ref().map(|p| p.display().to_string()),
            "download job finished"
        );
    }
}

/// One delivery to one follower of a finished job
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub job_id: JobId,
    pub requester: String,
    pub state: JobState,
    pub artifact: Option<PathBuf>,
    pub error: Option<ErrorDetail>,
}

/// Push-style sink: emits one [`CompletionEvent`] per follower over an
/// unbounded channel. A chat-bot adapter (or any other push consumer)
/// drains the receiver.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CompletionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CompletionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn on_terminal(&self, job: &JobSnapshot) {
        for requester in &job.followers {
            let event = CompletionEvent {
                job_id: job.id,
                requester: requester.clone(),
                state: job.state,
                artifact: job.artifact.clone(),
                error: job.error.clone(),
            };
            if self.tx.send(event).is_err() {
                warn!(job_id = %job.id, "completion receiver dropped, notification lost");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FailureCode;
    use chrono::Utc;
    use uuid::Uuid;

    fn finished_job(followers: Vec<&str>) -> JobSnapshot {
        JobSnapshot {
            id: Uuid::now_v7(),
            state: JobState::Failed,
            url: "https://example.com/v".to_string(),
            requester: followers.first().unwrap_or(&"origin").to_string(),
            followers: followers.into_iter().map(String::from).collect(),
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
            artifact: None,
            error: Some(ErrorDetail::new(FailureCode::Runtime, "boom")),
        }
    }

    #[tokio::test]
    async fn channel_sink_fans_out_to_every_follower() {
        let (sink, mut rx) = ChannelSink::new();
        let job = finished_job(vec!["alice", "bob", "carol"]);

        sink.on_terminal(&job).await;

        let mut delivered = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.job_id, job.id);
            assert_eq!(event.state, JobState::Failed);
            delivered.push(event.requester);
        }
        assert_eq!(delivered, vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.on_terminal(&finished_job(vec!["alice"])).await;
    }
}
