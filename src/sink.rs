//! Artifact persistence.
//!
//! The pipeline only talks to [`ArtifactSink`]; [`FsSink`] lays artifacts
//! out on disk as `<root>/<job_id>/<name>`.

use crate::error::Pdf2DocError;
use crate::job::JobId;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Where a job's snapshot and artifacts are stored.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Store `bytes` under `name` (a relative `/`-separated path) for `job`
    /// and return the location it can be read back from.
    async fn write(&self, job: &JobId, name: &str, bytes: &[u8]) -> Result<PathBuf, Pdf2DocError>;

    /// Read back a location previously returned by [`ArtifactSink::write`].
    async fn read(&self, location: &Path) -> Result<Vec<u8>, Pdf2DocError>;

    /// Delete everything stored for `job`. Deleting nothing is not an error.
    async fn remove_all(&self, job: &JobId) -> Result<(), Pdf2DocError>;
}

/// Filesystem sink with atomic writes (temp file + rename).
#[derive(Debug, Clone)]
pub struct FsSink {
    root: PathBuf,
}

impl FsSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job: &JobId) -> PathBuf {
        self.root.join(job.to_string())
    }

    fn resolve(&self, job: &JobId, name: &str) -> Result<PathBuf, Pdf2DocError> {
        let rel = Path::new(name);
        let safe = !name.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Pdf2DocError::Internal(format!(
                "artifact name '{name}' must be a relative path without '..'"
            )));
        }
        Ok(self.job_dir(job).join(rel))
    }
}

#[async_trait]
impl ArtifactSink for FsSink {
    async fn write(&self, job: &JobId, name: &str, bytes: &[u8]) -> Result<PathBuf, Pdf2DocError> {
        let path = self.resolve(job, name)?;
        let write_err = |e: std::io::Error| Pdf2DocError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(write_err)?;

        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    async fn read(&self, location: &Path) -> Result<Vec<u8>, Pdf2DocError> {
        tokio::fs::read(location)
            .await
            .map_err(|e| Pdf2DocError::Internal(format!("cannot read {}: {e}", location.display())))
    }

    async fn remove_all(&self, job: &JobId) -> Result<(), Pdf2DocError> {
        let dir = self.job_dir(job);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Pdf2DocError::OutputWriteFailed { path: dir, source: e }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsSink::new(dir.path());
        let job = JobId::new();

        let path = sink.write(&job, "images/p0-r1.png", b"png").await.unwrap();
        assert_eq!(path, dir.path().join(job.to_string()).join("images/p0-r1.png"));
        assert_eq!(sink.read(&path).await.unwrap(), b"png");
        assert!(!path.with_extension("png.tmp").exists());

        sink.remove_all(&job).await.unwrap();
        assert!(!sink.job_dir(&job).exists());
        sink.remove_all(&job).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsSink::new(dir.path());
        let job = JobId::new();
        assert!(sink.write(&job, "../evil", b"x").await.is_err());
        assert!(sink.write(&job, "/abs", b"x").await.is_err());
        assert!(sink.write(&job, "", b"x").await.is_err());
    }
}
