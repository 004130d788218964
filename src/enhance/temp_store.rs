use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::validation::ImageExtension;

#[derive(Debug, Error)]
pub enum TempStoreError {
    #[error("failed to prepare temp directory '{path}': {source}")]
    PrepareDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write temp artifact '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default)]
struct TempStoreCounters {
    acquired: AtomicU64,
    released: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TempStoreStats {
    pub acquired: u64,
    pub released: u64,
    pub live: u64,
}

/// Request-scoped upload files under one directory. Names are random, never
/// derived from what the caller sent.
#[derive(Debug, Clone)]
pub struct TempStore {
    root: PathBuf,
    counters: Arc<TempStoreCounters>,
}

impl TempStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counters: Arc::new(TempStoreCounters::default()),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn stats(&self) -> TempStoreStats {
        let acquired = self.counters.acquired.load(Ordering::SeqCst);
        let released = self.counters.released.load(Ordering::SeqCst);
        TempStoreStats {
            acquired,
            released,
            live: acquired.saturating_sub(released),
        }
    }

    pub fn artifact_name(extension: &ImageExtension) -> String {
        format!("upload_{}.{}", Uuid::new_v4().simple(), extension.as_str())
    }

    /// Streams `source` into a fresh file. The returned guard owns the file; if the
    /// write fails the partial file is removed before the error is returned.
    pub async fn acquire<R>(
        &self,
        mut source: R,
        extension: &ImageExtension,
    ) -> Result<TempArtifact, TempStoreError>
    where
        R: AsyncRead + Unpin,
    {
        fs::create_dir_all(self.root.as_path())
            .await
            .map_err(|source| TempStoreError::PrepareDir {
                path: self.root.display().to_string(),
                source,
            })?;

        let path = self.root.join(Self::artifact_name(extension));
        let write_error = |source| TempStoreError::Write {
            path: path.display().to_string(),
            source,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_path())
            .await
            .map_err(write_error)?;

        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        let mut artifact = TempArtifact {
            path: path.clone(),
            size_bytes: 0,
            counters: self.counters.clone(),
            released: false,
        };

        let copied = match tokio::io::copy(&mut source, &mut file).await {
            Ok(n) => file.flush().await.map(|_| n),
            Err(error) => Err(error),
        };
        drop(file);
        match copied {
            Ok(n) => {
                artifact.size_bytes = n;
                debug!(artifact = %artifact.file_name(), bytes = n, "staged upload");
                Ok(artifact)
            }
            Err(source) => {
                artifact.release().await;
                Err(write_error(source))
            }
        }
    }
}

/// Guard for one staged upload. `release` removes the file; dropping an
/// unreleased guard (cancelled request, panic) removes it synchronously.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    size_bytes: u64,
    counters: Arc<TempStoreCounters>,
    released: bool,
}

impl TempArtifact {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or_default()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub async fn release(mut self) {
        if self.released {
            return;
        }
        self.released = true;
        log_remove_result(self.path.as_path(), fs::remove_file(self.path.as_path()).await);
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        log_remove_result(self.path.as_path(), std::fs::remove_file(self.path.as_path()));
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        debug!(artifact = %self.path.display(), "released temp artifact on drop");
    }
}

fn log_remove_result(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => {}
        Err(error) if error.kind() == IoErrorKind::NotFound => {}
        Err(error) => warn!(artifact = %path.display(), %error, "failed to remove temp artifact"),
    }
}
