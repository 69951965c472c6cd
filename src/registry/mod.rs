//! In-memory job registry: the single source of truth for job state.
//!
//! The registry owns every [`JobRecord`] plus the dedup index mapping active
//! dedup keys to job ids. All mutation happens behind one mutex with
//! clone-out critical sections; callers only ever receive [`JobSnapshot`]
//! copies, so readers never hold the lock across I/O.
//!
//! The orchestrator is the only caller of the mutating operations. State
//! transitions are one-directional: any attempt to move a job out of a
//! terminal state fails with [`RegistryError::InvalidTransition`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::{
    DedupKey, DownloadRequest, ErrorDetail, FailureCode, JobId, JobRecord, JobSnapshot, JobState,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Payload accompanying a state transition. Terminal states carry exactly
/// one of an artifact path or an error detail; `Started` carries neither.
#[derive(Debug)]
pub enum TransitionPayload {
    Started,
    Artifact(PathBuf),
    Error(ErrorDetail),
}

/// Outcome of an atomic submit: either a fresh Queued job or attachment to
/// an active job with the same dedup key.
#[derive(Debug)]
pub enum SubmitDisposition {
    Created(JobSnapshot),
    Attached(JobSnapshot),
}

/// Outcome of an atomic cancel request
#[derive(Debug)]
pub enum CancelDisposition {
    /// Job already reached a terminal state; cancel is a no-op
    AlreadyTerminal(JobSnapshot),
    /// Job was still Queued and is now Cancelled; no subprocess ever ran
    CancelledWhileQueued(JobSnapshot),
    /// Job is Running; intent recorded, the worker must tear down the child
    SignalRunning(JobSnapshot),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub terminal: usize,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, JobRecord>,
    /// dedup key -> active (Queued/Running) job; entries die on terminal transition
    active_keys: HashMap<DedupKey, JobId>,
}

#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("job registry lock poisoned")
    }

    /// Create a job for the request, or attach the requester as a follower
    /// of an active job with the same dedup key. Atomic: two concurrent
    /// submissions of equal keys cannot both create.
    pub fn submit(&self, request: DownloadRequest, key: DedupKey) -> SubmitDisposition {
        let mut inner = self.lock();

        let existing = inner.active_keys.get(&key).copied();
        if let Some(existing) = existing {
            if let Some(record) = inner.jobs.get_mut(&existing) {
                if !record.followers.contains(&request.requester) {
                    record.followers.push(request.requester);
                }
                return SubmitDisposition::Attached(record.snapshot());
            }
        }

        let record = JobRecord::new(request, key.clone());
        let snapshot = record.snapshot();
        inner.active_keys.insert(key, record.id);
        inner.jobs.insert(record.id, record);
        SubmitDisposition::Created(snapshot)
    }

    pub fn get(&self, id: JobId) -> Option<JobSnapshot> {
        self.lock().jobs.get(&id).map(JobRecord::snapshot)
    }

    pub fn request_of(&self, id: JobId) -> Option<DownloadRequest> {
        self.lock().jobs.get(&id).map(|r| r.request.clone())
    }

    /// Apply a state transition. Rejects transitions out of terminal states
    /// and payloads that would violate the artifact-xor-error invariant.
    pub fn transition(
        &self,
        id: JobId,
        to: JobState,
        payload: TransitionPayload,
    ) -> Result<JobSnapshot> {
        let mut inner = self.lock();
        let record = inner.jobs.get_mut(&id).ok_or(RegistryError::NotFound(id))?;

        let from = record.state;
        if !transition_allowed(from, to) || !payload_matches(&payload, to) {
            return Err(RegistryError::InvalidTransition { id, from, to });
        }

        record.state = to;
        match payload {
            TransitionPayload::Started => record.started_at = Some(Utc::now()),
            TransitionPayload::Artifact(path) => {
                record.finished_at = Some(Utc::now());
                record.artifact = Some(path);
            }
            TransitionPayload::Error(detail) => {
                record.finished_at = Some(Utc::now());
                record.error = Some(detail);
            }
        }

        let snapshot = record.snapshot();
        if to.is_terminal() {
            let key = record.dedup_key.clone();
            if inner.active_keys.get(&key) == Some(&id) {
                inner.active_keys.remove(&key);
            }
        }
        Ok(snapshot)
    }

    /// Record cancellation intent atomically with the state inspection, so
    /// a job cannot slip from Queued to Running between the two.
    pub fn begin_cancel(&self, id: JobId) -> Result<CancelDisposition> {
        let mut inner = self.lock();
        let record = inner.jobs.get_mut(&id).ok_or(RegistryError::NotFound(id))?;

        match record.state {
            state if state.is_terminal() => {
                Ok(CancelDisposition::AlreadyTerminal(record.snapshot()))
            }
            JobState::Running => {
                record.cancel_requested = true;
                Ok(CancelDisposition::SignalRunning(record.snapshot()))
            }
            _ => {
                record.cancel_requested = true;
                record.state = JobState::Cancelled;
                record.finished_at = Some(Utc::now());
                record.error = Some(ErrorDetail::new(
                    FailureCode::Cancelled,
                    "cancelled before download started",
                ));
                let snapshot = record.snapshot();
                let key = record.dedup_key.clone();
                if inner.active_keys.get(&key) == Some(&id) {
                    inner.active_keys.remove(&key);
                }
                Ok(CancelDisposition::CancelledWhileQueued(snapshot))
            }
        }
    }

    /// Jobs in creation order (UUIDv7 ids sort by time), optionally filtered
    /// by state, starting strictly after `after`.
    pub fn list(
        &self,
        state: Option<JobState>,
        after: Option<JobId>,
        limit: usize,
    ) -> Vec<JobSnapshot> {
        let inner = self.lock();
        let mut snapshots: Vec<JobSnapshot> = inner
            .jobs
            .values()
            .filter(|r| state.is_none_or(|s| r.state == s))
            .filter(|r| after.is_none_or(|a| r.id > a))
            .map(JobRecord::snapshot)
            .collect();
        snapshots.sort_by_key(|s| s.id);
        snapshots.truncate(limit);
        snapshots
    }

    pub fn counts(&self) -> JobCounts {
        let inner = self.lock();
        let mut counts = JobCounts::default();
        for record in inner.jobs.values() {
            match record.state {
                JobState::Queued => counts.queued += 1,
                JobState::Running => counts.running += 1,
                _ => counts.terminal += 1,
            }
        }
        counts
    }

    /// Terminal jobs and their finish times, oldest first. Used by the
    /// retention sweep to pick eviction candidates.
    pub fn terminal_overview(&self) -> Vec<(JobId, DateTime<Utc>)> {
        let inner = self.lock();
        let mut terminal: Vec<(JobId, DateTime<Utc>)> = inner
            .jobs
            .values()
            .filter(|r| r.state.is_terminal())
            .filter_map(|r| r.finished_at.map(|at| (r.id, at)))
            .collect();
        terminal.sort_by_key(|&(_, at)| at);
        terminal
    }

    /// Remove a terminal job record. In-flight jobs are never removed;
    /// returns `None` for those as well as for unknown ids.
    pub fn remove_terminal(&self, id: JobId) -> Option<JobRecord> {
        let mut inner = self.lock();
        if inner.jobs.get(&id).is_some_and(|r| r.state.is_terminal()) {
            inner.jobs.remove(&id)
        } else {
            None
        }
    }
}

fn transition_allowed(from: JobState, to: JobState) -> bool {
    use JobState::*;
    matches!(
        (from, to),
        (Queued, Running)
            | (Queued, Cancelled)
            | (Running, Succeeded)
            | (Running, Failed)
            | (Running, TimedOut)
            | (Running, Cancelled)
    )
}

fn payload_matches(payload: &TransitionPayload, to: JobState) -> bool {
    match payload {
        TransitionPayload::Started => to == JobState::Running,
        TransitionPayload::Artifact(_) => to == JobState::Succeeded,
        TransitionPayload::Error(_) => {
            matches!(
                to,
                JobState::Failed | JobState::TimedOut | JobState::Cancelled
            )
        }
    }
}
