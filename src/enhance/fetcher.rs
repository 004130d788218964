use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use url::{Origin, Url};

use super::resolver::CanonicalImageReference;
use crate::settings::credentials::Credential;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to download enhanced image from {url}: HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Failed to download enhanced image from {url}: {message}")]
    Transport { url: String, message: String },
    #[error("Enhanced image exceeds the {limit} byte download limit")]
    TooLarge { limit: u64 },
    #[error("Enhanced image from {source_desc} is empty")]
    Empty { source_desc: String },
    #[error("Enhanced image file not found: {path}")]
    NotFound { path: String },
    #[error("Failed to read enhanced image file {path}: {message}")]
    LocalRead { path: String, message: String },
    #[error("Enhanced image path {path} is outside the allowed results directory")]
    OutsideResultsDir { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedImage {
    pub bytes: Vec<u8>,
    pub source_kind: &'static str,
}

/// What one fetch may touch. The credential is only sent to `origin`, and local
/// files are only read from under `local_root`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchScope<'a> {
    pub credential: Option<&'a Credential>,
    pub origin: Option<&'a Origin>,
    pub local_root: Option<&'a Path>,
}

#[derive(Debug, Clone)]
pub struct ImageFetcher {
    client: Client,
    timeout: Duration,
    max_bytes: u64,
}

impl ImageFetcher {
    pub fn new(client: Client, timeout: Duration, max_bytes: u64) -> Self {
        Self {
            client,
            timeout,
            max_bytes,
        }
    }

    pub async fn fetch(
        &self,
        reference: CanonicalImageReference,
        scope: FetchScope<'_>,
    ) -> Result<EnhancedImage, FetchError> {
        let source_kind = reference.kind();
        let bytes = match reference {
            CanonicalImageReference::Inline { bytes, .. } => {
                if bytes.len() as u64 > self.max_bytes {
                    return Err(FetchError::TooLarge {
                        limit: self.max_bytes,
                    });
                }
                bytes
            }
            CanonicalImageReference::LocalPath(path) => {
                self.read_local(path.as_path(), scope.local_root).await?
            }
            CanonicalImageReference::Url(url) => self.download(&url, scope).await?,
        };
        Ok(EnhancedImage { bytes, source_kind })
    }

    async fn download(&self, url: &Url, scope: FetchScope<'_>) -> Result<Vec<u8>, FetchError> {
        let shown = redact_url(url);
        let transport = |error: reqwest::Error| FetchError::Transport {
            url: shown.clone(),
            message: if error.is_timeout() {
                String::from("request timed out")
            } else {
                error.without_url().to_string()
            },
        };

        let mut request = self.client.get(url.clone()).timeout(self.timeout);
        if let Some(credential) = scope.credential {
            if scope.origin.is_some_and(|origin| *origin == url.origin()) {
                request = request.bearer_auth(credential.expose());
            }
        }
        let mut response = request.send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: shown,
                status: status.as_u16(),
            });
        }
        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes)
        {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(chunk.as_ref());
        }
        if body.is_empty() {
            return Err(FetchError::Empty { source_desc: shown });
        }
        Ok(body)
    }

    async fn read_local(&self, path: &Path, root: Option<&Path>) -> Result<Vec<u8>, FetchError> {
        let shown = path.display().to_string();
        let outside = || FetchError::OutsideResultsDir {
            path: shown.clone(),
        };
        let read_error = |error: std::io::Error| {
            if error.kind() == IoErrorKind::NotFound {
                FetchError::NotFound {
                    path: shown.clone(),
                }
            } else {
                FetchError::LocalRead {
                    path: shown.clone(),
                    message: error.to_string(),
                }
            }
        };
        let root = root.ok_or_else(outside)?;
        let root = tokio::fs::canonicalize(root).await.map_err(|_| outside())?;
        let path = tokio::fs::canonicalize(path).await.map_err(read_error)?;
        if !path.starts_with(root.as_path()) {
            return Err(outside());
        }
        let path = path.as_path();
        let metadata = tokio::fs::metadata(path).await.map_err(read_error)?;
        if !metadata.is_file() {
            return Err(FetchError::NotFound { path: shown });
        }
        if metadata.len() > self.max_bytes {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }
        let bytes = tokio::fs::read(path).await.map_err(read_error)?;
        if bytes.is_empty() {
            return Err(FetchError::Empty { source_desc: shown });
        }
        Ok(bytes)
    }
}

/// URL without credentials, query or fragment, safe for messages and logs.
pub fn redact_url(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.set_fragment(None);
    let _ = shown.set_username("");
    let _ = shown.set_password(None);
    shown.to_string()
}
