//! Download orchestrator: the scheduling core.
//!
//! Owns the path from an accepted request to a terminal job. Submissions
//! are validated, deduplicated against active jobs, and enqueued; a single
//! scheduler task admits queued jobs FIFO into at most
//! `scheduler.max_concurrency` concurrently running workers, each of which
//! drives one subprocess through the runner and writes the outcome back to
//! the registry. The concurrency bound is the only admission-control
//! mechanism; the queue itself is unbounded, so `submit` never blocks.
//!
//! Cancellation is cooperative: a cancel on a Queued job goes terminal
//! immediately and the scheduler skips it at dequeue; a cancel on a Running
//! job trips that job's cancellation token and the job only reaches
//! Cancelled after the worker confirms the child is reaped.

mod sweep;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::config::{Config, DownloaderConfig, RetentionConfig, SchedulerConfig};
use crate::job::{
    DownloadOptions, DownloadRequest, ErrorDetail, FailureCode, JobId, JobSnapshot, JobState,
    dedup,
};
use crate::registry::{
    CancelDisposition, JobRegistry, RegistryError, SubmitDisposition, TransitionPayload,
};
use crate::runner::{self, CommandSpec, RunExit, RunLimits, RunnerError};
use crate::sink::NotificationSink;

pub use sweep::SweepStats;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to prepare artifact storage: {0}")]
    Artifacts(#[from] ArtifactError),
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

#[derive(Debug)]
pub enum SubmitOutcome {
    /// A fresh job was created and queued
    Enqueued(JobSnapshot),
    /// An active job with the same dedup key absorbed this request
    AttachedExisting(JobSnapshot),
}

impl SubmitOutcome {
    pub fn snapshot(&self) -> &JobSnapshot {
        match self {
            SubmitOutcome::Enqueued(snapshot) => snapshot,
            SubmitOutcome::AttachedExisting(snapshot) => snapshot,
        }
    }
}

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("job not found: {0}")]
    NotFound(JobId),
}

#[derive(Debug)]
pub enum CancelOutcome {
    /// Job was still queued; it is now Cancelled and never started
    Cancelled(JobSnapshot),
    /// Job is running; teardown signalled, Cancelled follows once the
    /// child is confirmed gone
    CancelRequested(JobSnapshot),
    /// Job had already finished; nothing to do
    AlreadyTerminal(JobSnapshot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Ok,
    Degraded,
}

/// Service health as reported to the external interface
#[derive(Debug, Clone)]
pub struct Health {
    pub status: ServiceStatus,
    pub downloader_version: Option<String>,
    pub downloader_error: Option<String>,
    pub queued: usize,
    pub running: usize,
    pub saturated: bool,
}

#[derive(Default)]
struct DownloaderStatus {
    version: Option<String>,
    error: Option<String>,
}

pub struct Orchestrator {
    registry: JobRegistry,
    artifacts: ArtifactStore,
    sink: Arc<dyn NotificationSink>,
    downloader: DownloaderConfig,
    scheduler: SchedulerConfig,
    retention: RetentionConfig,
    queue_tx: mpsc::UnboundedSender<JobId>,
    cancel_tokens: Mutex<HashMap<JobId, CancellationToken>>,
    semaphore: Arc<Semaphore>,
    downloader_status: tokio::sync::Mutex<DownloaderStatus>,
    shutdown_token: CancellationToken,
}

impl Orchestrator {
    /// Build the orchestrator and spawn its scheduler and retention-sweep
    /// tasks. A missing downloader binary is not fatal here; it degrades
    /// the health report instead.
    pub async fn start(
        config: &Config,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Arc<Self>, OrchestratorError> {
        let artifacts = ArtifactStore::new(config.output.root.clone());
        artifacts.ensure_root().await?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let orchestrator = Arc::new(Self {
            registry: JobRegistry::new(),
            artifacts,
            sink,
            downloader: config.downloader.clone(),
            scheduler: config.scheduler.clone(),
            retention: config.retention.clone(),
            queue_tx,
            cancel_tokens: Mutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(config.scheduler.max_concurrency)),
            downloader_status: tokio::sync::Mutex::new(DownloaderStatus::default()),
            shutdown_token: CancellationToken::new(),
        });

        match orchestrator.probe_downloader().await {
            (Some(version), _) => {
                info!(binary = %orchestrator.downloader.binary.display(), version, "downloader available")
            }
            (None, error) => warn!(
                binary = %orchestrator.downloader.binary.display(),
                error = error.as_deref().unwrap_or("unknown"),
                "downloader unavailable, service starts degraded"
            ),
        }

        tokio::spawn(Arc::clone(&orchestrator).scheduler_loop(queue_rx));
        tokio::spawn(sweep::run(Arc::clone(&orchestrator)));

        Ok(orchestrator)
    }

    /// Validate and accept a download request. Returns immediately: the
    /// job is queued, not started. Malformed URLs never create a job.
    pub fn submit(
        &self,
        raw_url: &str,
        options: DownloadOptions,
        requester: impl Into<String>,
    ) -> Result<SubmitOutcome, SubmitError> {
        let source_url =
            Url::parse(raw_url).map_err(|err| SubmitError::InvalidUrl(err.to_string()))?;
        if !matches!(source_url.scheme(), "http" | "https") {
            return Err(SubmitError::InvalidUrl(format!(
                "unsupported scheme '{}'",
                source_url.scheme()
            )));
        }
        if source_url.host_str().is_none() {
            return Err(SubmitError::InvalidUrl("missing host".to_string()));
        }

        let key = dedup::dedup_key(&source_url, &options);
        let request = DownloadRequest {
            source_url,
            options,
            requester: requester.into(),
        };

        match self.registry.submit(request, key) {
            SubmitDisposition::Attached(snapshot) => {
                debug!(job_id = %snapshot.id, "request deduplicated onto active job");
                Ok(SubmitOutcome::AttachedExisting(snapshot))
            }
            SubmitDisposition::Created(snapshot) => {
                info!(job_id = %snapshot.id, url = %snapshot.url, "job queued");
                if self.queue_tx.send(snapshot.id).is_err() {
                    // scheduler is gone (shutdown); the job stays queued and
                    // is reported as such
                    warn!(job_id = %snapshot.id, "scheduler unavailable, job not admitted");
                }
                Ok(SubmitOutcome::Enqueued(snapshot))
            }
        }
    }

    pub fn status(&self, id: JobId) -> Option<JobSnapshot> {
        self.registry.get(id)
    }

    pub fn list(
        &self,
        state: Option<JobState>,
        after: Option<JobId>,
        limit: usize,
    ) -> Vec<JobSnapshot> {
        self.registry.list(state, after, limit)
    }

    /// Cancel a job. Idempotent: cancelling an already-terminal job is a
    /// no-op, reported as [`CancelOutcome::AlreadyTerminal`].
    pub async fn cancel(&self, id: JobId) -> Result<CancelOutcome, CancelError> {
        match self.registry.begin_cancel(id) {
            Err(RegistryError::NotFound(id)) => Err(CancelError::NotFound(id)),
            Err(err) => {
                // begin_cancel only fails with NotFound today; anything else
                // is a registry bug worth surfacing in the log
                warn!(job_id = %id, error = %err, "unexpected cancel failure");
                Err(CancelError::NotFound(id))
            }
            Ok(CancelDisposition::AlreadyTerminal(snapshot)) => {
                Ok(CancelOutcome::AlreadyTerminal(snapshot))
            }
            Ok(CancelDisposition::CancelledWhileQueued(snapshot)) => {
                info!(job_id = %id, "queued job cancelled");
                self.sink.on_terminal(&snapshot).await;
                Ok(CancelOutcome::Cancelled(snapshot))
            }
            Ok(CancelDisposition::SignalRunning(snapshot)) => {
                info!(job_id = %id, "cancelling running job");
                if let Some(token) = self.lock_tokens().get(&id) {
                    token.cancel();
                }
                Ok(CancelOutcome::CancelRequested(snapshot))
            }
        }
    }

    /// Current service health: degraded when the downloader binary is
    /// unreachable or the worker pool is saturated past the configured
    /// queue-depth threshold.
    pub async fn health(&self) -> Health {
        let counts = self.registry.counts();
        let (version, error) = self.probe_downloader().await;

        let saturated = counts.running >= self.scheduler.max_concurrency
            && counts.queued > self.scheduler.saturation_threshold;
        let status = if version.is_none() || saturated {
            ServiceStatus::Degraded
        } else {
            ServiceStatus::Ok
        };

        Health {
            status,
            downloader_version: version,
            downloader_error: error,
            queued: counts.queued,
            running: counts.running,
            saturated,
        }
    }

    /// Run one retention sweep immediately (also runs periodically in the
    /// background).
    pub async fn sweep_now(&self) -> SweepStats {
        sweep::sweep_once(self).await
    }

    /// Stop admitting work and signal every running download to terminate.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
        for token in self.lock_tokens().values() {
            token.cancel();
        }
    }

    fn lock_tokens(&self) -> MutexGuard<'_, HashMap<JobId, CancellationToken>> {
        self.cancel_tokens
            .lock()
            .expect("cancel token table poisoned")
    }

    /// Probe the downloader binary, caching success. A failed probe is
    /// retried on the next call so the service recovers once the binary
    /// appears.
    async fn probe_downloader(&self) -> (Option<String>, Option<String>) {
        let mut status = self.downloader_status.lock().await;
        if status.version.is_none() {
            match runner::probe_version(&self.downloader.binary).await {
                Ok(version) => {
                    status.version = Some(version);
                    status.error = None;
                }
                Err(err) => status.error = Some(err.to_string()),
            }
        }
        (status.version.clone(), status.error.clone())
    }

    /// FIFO admission: a concurrency permit is acquired *before* the next
    /// job is dequeued, so queue order is admission order.
    async fn scheduler_loop(self: Arc<Self>, mut queue: mpsc::UnboundedReceiver<JobId>) {
        loop {
            let permit = tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let id = tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                next = queue.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };

            // jobs cancelled while queued are already terminal; skip them
            // without ever starting a subprocess
            if self
                .registry
                .get(id)
                .is_none_or(|snapshot| snapshot.state != JobState::Queued)
            {
                debug!(job_id = %id, "skipping job no longer queued");
                continue;
            }

            let cancel = CancellationToken::new();
            self.lock_tokens().insert(id, cancel.clone());

            let worker = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                worker.execute(id, cancel).await;
            });
        }
        debug!("scheduler stopped");
    }

    async fn execute(self: Arc<Self>, id: JobId, cancel: CancellationToken) {
        let terminal = self.run_job(id, &cancel).await;
        self.lock_tokens().remove(&id);

        if let Some(snapshot) = terminal {
            info!(job_id = %id, state = %snapshot.state, "job finished");
            self.sink.on_terminal(&snapshot).await;
        }
    }

    /// Drive one admitted job to a terminal state. Returns `None` only when
    /// the job was cancelled between dequeue and admission, in which case
    /// the cancel path already reported it.
    async fn run_job(&self, id: JobId, cancel: &CancellationToken) -> Option<JobSnapshot> {
        let Some(request) = self.registry.request_of(id) else {
            warn!(job_id = %id, "admitted job vanished from registry");
            return None;
        };

        if let Err(err) = self
            .registry
            .transition(id, JobState::Running, TransitionPayload::Started)
        {
            // lost the race against a queued-cancel; no subprocess started
            debug!(job_id = %id, error = %err, "job not admissible");
            return None;
        }
        info!(job_id = %id, url = %request.source_url, "download started");

        let job_dir = match self.artifacts.create_job_dir(id).await {
            Ok(dir) => dir,
            Err(err) => {
                return self.finish_with_error(
                    id,
                    JobState::Failed,
                    FailureCode::Runtime,
                    format!("failed to prepare output directory: {err}"),
                );
            }
        };

        let spec = CommandSpec::ytdlp(
            &self.downloader,
            &request.source_url,
            &request.options,
            &job_dir,
        );
        let limits = RunLimits {
            timeout: self.downloader.timeout.as_duration(),
            kill_grace: self.downloader.kill_grace.as_duration(),
            tail_lines: self.downloader.tail_lines,
        };

        match runner::run(&spec, &limits, cancel).await {
            Err(RunnerError::Spawn { source, .. }) => {
                let snapshot = self.finish_with_error(
                    id,
                    JobState::Failed,
                    FailureCode::Spawn,
                    format!("failed to start downloader: {source}"),
                );
                self.cleanup(id).await;
                snapshot
            }
            Err(err) => {
                let snapshot = self.finish_with_error(
                    id,
                    JobState::Failed,
                    FailureCode::Runtime,
                    err.to_string(),
                );
                self.cleanup(id).await;
                snapshot
            }
            Ok(outcome) => match outcome.exit {
                RunExit::Completed(status) if status.success() => {
                    self.settle_success(id).await
                }
                RunExit::Completed(status) => {
                    let detail = if outcome.stderr_tail.is_empty() {
                        format!("downloader exited with {status}")
                    } else {
                        outcome.stderr_joined()
                    };
                    let snapshot = self.finish_with_error(
                        id,
                        JobState::Failed,
                        FailureCode::Runtime,
                        detail,
                    );
                    self.cleanup(id).await;
                    snapshot
                }
                RunExit::TimedOut => {
                    let snapshot = self.finish_with_error(
                        id,
                        JobState::TimedOut,
                        FailureCode::Timeout,
                        format!("download exceeded the {} budget", self.downloader.timeout),
                    );
                    self.cleanup(id).await;
                    snapshot
                }
                RunExit::Cancelled => {
                    let snapshot = self.finish_with_error(
                        id,
                        JobState::Cancelled,
                        FailureCode::Cancelled,
                        "cancelled by caller",
                    );
                    self.cleanup(id).await;
                    snapshot
                }
            },
        }
    }

    /// Exit code zero still needs an artifact on disk before the job
    /// counts as Succeeded; a clean exit with nothing produced is a
    /// runtime failure.
    async fn settle_success(&self, id: JobId) -> Option<JobSnapshot> {
        match self.artifacts.find_artifact(id).await {
            Ok(Some(path)) => {
                match self
                    .registry
                    .transition(id, JobState::Succeeded, TransitionPayload::Artifact(path))
                {
                    Ok(snapshot) => Some(snapshot),
                    Err(err) => {
                        warn!(job_id = %id, error = %err, "could not record success");
                        None
                    }
                }
            }
            Ok(None) => {
                let snapshot = self.finish_with_error(
                    id,
                    JobState::Failed,
                    FailureCode::Runtime,
                    "downloader produced no output",
                );
                self.cleanup(id).await;
                snapshot
            }
            Err(err) => {
                let snapshot = self.finish_with_error(
                    id,
                    JobState::Failed,
                    FailureCode::Runtime,
                    format!("failed to locate artifact: {err}"),
                );
                self.cleanup(id).await;
                snapshot
            }
        }
    }

    fn finish_with_error(
        &self,
        id: JobId,
        state: JobState,
        code: FailureCode,
        message: impl Into<String>,
    ) -> Option<JobSnapshot> {
        match self.registry.transition(
            id,
            state,
            TransitionPayload::Error(ErrorDetail::new(code, message)),
        ) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(job_id = %id, error = %err, "could not record failure");
                None
            }
        }
    }

    /// Partial downloads are never left behind: any non-success outcome
    /// removes the job directory.
    async fn cleanup(&self, id: JobId) {
        if let Err(err) = self.artifacts.remove_job_dir(id).await {
            warn!(job_id = %id, error = %err, "failed to clean up job directory");
        }
    }
}
