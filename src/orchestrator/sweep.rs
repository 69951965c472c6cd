//! Retention sweep for terminal jobs and their artifacts.
//!
//! Terminal jobs older than `retention.job_ttl` are removed, and when the
//! terminal population exceeds `retention.max_terminal_jobs` the oldest
//! entries beyond the cap go too. In-flight jobs are never touched.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::Orchestrator;
use crate::job::JobId;

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub jobs_removed: usize,
}

pub(super) async fn run(orchestrator: Arc<Orchestrator>) {
    let mut ticker = tokio::time::interval(orchestrator.retention.sweep_interval.as_duration());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = orchestrator.shutdown_token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let stats = sweep_once(&orchestrator).await;
        if stats.jobs_removed > 0 {
            info!(removed = stats.jobs_removed, "retention sweep evicted terminal jobs");
        }
    }
    debug!("retention sweep stopped");
}

pub(super) async fn sweep_once(orchestrator: &Orchestrator) -> SweepStats {
    let ttl = chrono::Duration::from_std(orchestrator.retention.job_ttl.as_duration())
        .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
    let cutoff = Utc::now() - ttl;

    // oldest first, so the count cap evicts in age order
    let terminal = orchestrator.registry.terminal_overview();

    let mut candidates: Vec<JobId> = terminal
        .iter()
        .filter(|(_, finished_at)| *finished_at < cutoff)
        .map(|(id, _)| *id)
        .collect();

    let cap = orchestrator.retention.max_terminal_jobs;
    if terminal.len() > cap {
        for (id, _) in terminal.iter().take(terminal.len() - cap) {
            if !candidates.contains(id) {
                candidates.push(*id);
            }
        }
    }

    let mut stats = SweepStats::default();
    for id in candidates {
        // remove_terminal refuses anything still in flight
        if orchestrator.registry.remove_terminal(id).is_some() {
            if let Err(err) = orchestrator.artifacts.remove_job_dir(id).await {
                warn!(job_id = %id, error = %err, "failed to remove swept artifact");
            }
            debug!(job_id = %id, "terminal job swept");
            stats.jobs_removed += 1;
        }
    }
    stats
}
