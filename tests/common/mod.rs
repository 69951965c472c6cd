//! Shared test helpers: fake downloader scripts and config wiring.
//!
//! The fake downloader is a shell script that answers the `--version`
//! probe and otherwise behaves however the test dictates. Inside the body,
//! `$out` is the job directory (parsed from `-P`) and `$last` is the
//! source URL (always the final argument).

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use mediafetch::config::Config;
use mediafetch::humanize::HumanDuration;
use mediafetch::job::{JobId, JobSnapshot, JobState};
use mediafetch::orchestrator::Orchestrator;

pub fn write_fake_downloader(dir: &Path, name: &str, body: &str) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "fake-dl 2025.06.09"
  exit 0
fi
out=""
prev=""
last=""
for arg in "$@"; do
  if [ "$prev" = "-P" ]; then
    out="$arg"
  fi
  prev="$arg"
  last="$arg"
done
{body}
"#
    );

    let path = dir.join(name);
    std::fs::write(&path, script).expect("write fake downloader");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake downloader");
    }
    path
}

pub fn test_config(binary: &Path, output_root: &Path) -> Config {
    let mut config = Config::default();
    config.downloader.binary = binary.to_path_buf();
    config.downloader.timeout = HumanDuration::from_secs(10);
    config.downloader.kill_grace = HumanDuration(Duration::from_millis(250));
    config.output.root = output_root.to_path_buf();
    // keep the background sweep out of the way; tests call sweep_now()
    config.retention.sweep_interval = HumanDuration::from_secs(3600);
    config
}

pub async fn wait_for_terminal(orchestrator: &Orchestrator, id: JobId) -> JobSnapshot {
    wait_until(orchestrator, id, |snapshot| snapshot.state.is_terminal()).await
}

pub async fn wait_for_state(orchestrator: &Orchestrator, id: JobId, state: JobState) -> JobSnapshot {
    wait_until(orchestrator, id, |snapshot| snapshot.state == state).await
}

async fn wait_until(
    orchestrator: &Orchestrator,
    id: JobId,
    predicate: impl Fn(&JobSnapshot) -> bool,
) -> JobSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(snapshot) = orchestrator.status(id) {
            if predicate(&snapshot) {
                return snapshot;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting on job {id}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
