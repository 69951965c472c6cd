//! Subprocess runner for the external downloader.
//!
//! Spawns exactly one child per [`run`] call, streams stdout/stderr into
//! bounded tail buffers, enforces a wall-clock timeout, and guarantees the
//! child is reaped on every exit path. Timeout and cancellation share the
//! same teardown: SIGTERM, a grace period, then SIGKILL.

pub mod command;

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use command::{CommandSpec, probe_version};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: io::Error,
    },

    #[error("version probe of {program} timed out")]
    ProbeTimeout { program: PathBuf },

    #[error("version probe of {program} exited with {status}")]
    ProbeFailed {
        program: PathBuf,
        status: ExitStatus,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Limits applied to a single run
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Wall-clock budget for the whole subprocess
    pub timeout: Duration,
    /// How long to wait between SIGTERM and SIGKILL
    pub kill_grace: Duration,
    /// Lines of stdout/stderr retained per stream
    pub tail_lines: usize,
}

/// How the child finished
#[derive(Debug, Clone)]
pub enum RunExit {
    /// Child exited on its own
    Completed(ExitStatus),
    /// Wall-clock budget exceeded; child was terminated and reaped
    TimedOut,
    /// Cancellation requested; child was terminated and reaped
    Cancelled,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub exit: RunExit,
    pub stdout_tail: Vec<String>,
    pub stderr_tail: Vec<String>,
}

impl RunOutcome {
    /// The captured stderr tail as one diagnostic string
    pub fn stderr_joined(&self) -> String {
        self.stderr_tail.join("\n")
    }
}

/// Fixed-capacity line buffer: keeps the newest `cap` lines, drops the rest.
/// Bounds memory no matter how chatty the download gets.
#[derive(Debug)]
struct TailBuffer {
    cap: usize,
    lines: VecDeque<String>,
}

impl TailBuffer {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            lines: VecDeque::with_capacity(cap.min(64)),
        }
    }

    fn push(&mut self, line: String) {
        if self.cap == 0 {
            return;
        }
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Run the command to completion, timeout, or cancellation.
///
/// The child is reaped on every path before this function returns; a spawn
/// failure returns immediately with no partial state.
pub async fn run(
    spec: &CommandSpec,
    limits: &RunLimits,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RunnerError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

    debug!(program = %spec.program.display(), pid = child.id(), "downloader spawned");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("child stderr not captured"))?;

    let stdout_task = tokio::spawn(collect_tail(stdout, limits.tail_lines));
    let stderr_task = tokio::spawn(collect_tail(stderr, limits.tail_lines));

    let deadline = tokio::time::sleep(limits.timeout);
    tokio::pin!(deadline);

    let exit = tokio::select! {
        status = child.wait() => RunExit::Completed(status?),
        _ = cancel.cancelled() => {
            terminate(&mut child, limits.kill_grace).await?;
            RunExit::Cancelled
        }
        _ = &mut deadline => {
            terminate(&mut child, limits.kill_grace).await?;
            RunExit::TimedOut
        }
    };

    // the pipes are closed once the child is gone, so these finish promptly
    let stdout_tail = stdout_task
        .await
        .map(TailBuffer::into_lines)
        .unwrap_or_default();
    let stderr_tail = stderr_task
        .await
        .map(TailBuffer::into_lines)
        .unwrap_or_default();

    Ok(RunOutcome {
        exit,
        stdout_tail,
        stderr_tail,
    })
}

async fn collect_tail<R: AsyncRead + Unpin>(reader: R, cap: usize) -> TailBuffer {
    let mut tail = TailBuffer::new(cap);
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tail.push(line),
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "error reading downloader output");
                break;
            }
        }
    }
    tail
}

/// Terminate and reap the child: SIGTERM, wait out the grace period, then
/// SIGKILL. Returns only once the child has been waited on.
async fn terminate(child: &mut Child, grace: Duration) -> io::Result<()> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: plain kill(2) on a pid we own and have not yet reaped
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if let Ok(waited) = tokio::time::timeout(grace, child.wait()).await {
            waited?;
            return Ok(());
        }
        debug!(pid, "downloader ignored SIGTERM, force-killing");
    }
    #[cfg(not(unix))]
    let _ = grace;

    child.start_kill()?;
    child.wait().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("/bin/sh", vec!["-c".to_string(), script.to_string()])
    }

    fn limits() -> RunLimits {
        RunLimits {
            timeout: Duration::from_secs(10),
            kill_grace: Duration::from_millis(200),
            tail_lines: 40,
        }
    }

    #[tokio::test]
    async fn captures_exit_status_and_output() {
        let outcome = run(
            &sh("echo hello; echo oops >&2; exit 3"),
            &limits(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let RunExit::Completed(status) = outcome.exit else {
            panic!("expected completion");
        };
        assert_eq!(status.code(), Some(3));
        assert_eq!(outcome.stdout_tail, vec!["hello"]);
        assert_eq!(outcome.stderr_tail, vec!["oops"]);
    }

    #[tokio::test]
    async fn tail_buffers_are_bounded() {
        let mut limits = limits();
        limits.tail_lines = 5;
        let outcome = run(
            &sh("i=1; while [ $i -le 100 ]; do echo line-$i; i=$((i+1)); done"),
            &limits,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.stdout_tail.len(), 5);
        assert_eq!(outcome.stdout_tail.last().map(String::as_str), Some("line-100"));
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let mut limits = limits();
        limits.timeout = Duration::from_millis(100);

        let started = Instant::now();
        let outcome = run(
            &sh("exec sleep 30"),
            &limits,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome.exit, RunExit::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = run(&sh("exec sleep 30"), &limits(), &cancel).await.unwrap();

        assert!(matches!(outcome.exit, RunExit::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let spec = CommandSpec::new("/nonexistent/downloader-bin", vec![]);
        let err = run(&spec, &limits(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[test]
    fn tail_buffer_keeps_newest_lines() {
        let mut tail = TailBuffer::new(3);
        for i in 1..=5 {
            tail.push(format!("l{i}"));
        }
        assert_eq!(tail.into_lines(), vec!["l3", "l4", "l5"]);
    }
}
