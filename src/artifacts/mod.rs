//! Local artifact storage, partitioned per job.
//!
//! Every job writes into its own `<root>/<job_id>/` directory, so
//! concurrent downloads can never collide on a shared display name.
//! Artifacts are immutable once produced; the only mutation is deletion by
//! the failure-cleanup path or the retention sweep.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::job::JobId;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error under {path}: {source}")]
    Io {
        path: PathBuf,
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Temporary/partial file suffixes left behind by an interrupted
/// downloader; never reported as artifacts.
const PARTIAL_SUFFIXES: &[&str] = &["part", "ytdl", "tmp", "aria2"];

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| ArtifactError::Io {
                path: self.root.clone(),
                source,
            })
    }

    pub fn job_dir(&self, id: JobId) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub async fn create_job_dir(&self, id: JobId) -> Result<PathBuf> {
        let dir = self.job_dir(id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ArtifactError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(dir)
    }

    /// Locate the artifact a finished job produced: the largest
    /// non-partial file in the job directory. `None` when the directory is
    /// missing or holds nothing usable.
    pub async fn find_artifact(&self, id: JobId) -> Result<Option<PathBuf>> {
        let dir = self.job_dir(id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ArtifactError::Io { path: dir, source }),
        };

        let mut best: Option<(u64, PathBuf)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| ArtifactError::Io {
                path: dir.clone(),
                source,
            })?
        {
            let path = entry.path();
            if is_partial(&path) {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let size = metadata.len();
            if best.as_ref().is_none_or(|(len, _)| size > *len) {
                best = Some((size, path));
            }
        }

        Ok(best.map(|(_, path)| path))
    }

    /// Remove a job's output directory and everything in it. Idempotent:
    /// a missing directory is not an error.
    pub async fn remove_job_dir(&self, id: JobId) -> Result<()> {
        let dir = self.job_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(job_id = %id, "removed artifact directory");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ArtifactError::Io { path: dir, source }),
        }
    }
}

fn is_partial(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| PARTIAL_SUFFIXES.contains(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn store() -> (ArtifactStore, TempDir) {
        let temp = TempDir::new().unwrap();
        (ArtifactStore::new(temp.path()), temp)
    }

    #[tokio::test]
    async fn finds_largest_complete_file() {
        let (store, _temp) = store();
        let id = Uuid::now_v7();
        let dir = store.create_job_dir(id).await.unwrap();

        tokio::fs::write(dir.join("clip.webm"), b"x".repeat(10)).await.unwrap();
        tokio::fs::write(dir.join("clip.mp4"), b"x".repeat(100)).await.unwrap();
        tokio::fs::write(dir.join("clip.mp4.part"), b"x".repeat(9999))
            .await
            .unwrap();

        let artifact = store.find_artifact(id).await.unwrap().unwrap();
        assert_eq!(artifact.file_name().unwrap(), "clip.mp4");
    }

    #[tokio::test]
    async fn no_artifact_for_empty_or_missing_dir() {
        let (store, _temp) = store();
        let id = Uuid::now_v7();

        assert!(store.find_artifact(id).await.unwrap().is_none());

        store.create_job_dir(id).await.unwrap();
        assert!(store.find_artifact(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (store, _temp) = store();
        let id = Uuid::now_v7();
        let dir = store.create_job_dir(id).await.unwrap();
        tokio::fs::write(dir.join("clip.mp4"), b"data").await.unwrap();

        store.remove_job_dir(id).await.unwrap();
        assert!(!dir.exists());
        store.remove_job_dir(id).await.unwrap();
    }
}
