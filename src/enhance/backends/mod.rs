pub mod direct_http;
pub mod gradio;
pub mod gradio_call;
pub mod gradio_queue;
pub mod sse;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use thiserror::Error;

use super::params::EnhancementParameters;
use super::raw_result::RawInferenceResult;
use crate::settings::credentials::Credential;
use crate::settings::profiles::{BackendProfile, BackendProtocol};

const MAX_ERROR_BODY_CHARS: usize = 512;
/// Bytes of a failed response read for the error message; the rest is dropped.
const MAX_ERROR_BODY_BYTES: usize = 16 * 1024;
/// Largest JSON document or inline image accepted from a backend.
pub(crate) const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend request failed: {message}")]
    Transport { message: String, transient: bool },
    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Backend protocol error: {0}")]
    Protocol(String),
    #[error("Backend reported an error: {0}")]
    Remote(String),
    #[error("Backend did not complete within {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// Failures worth another attempt: connection and transport timeouts, 5xx and 429.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { transient, .. } => *transient,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub(crate) fn from_transport(error: reqwest::Error) -> Self {
        let transient = error.is_connect() || error.is_timeout();
        Self::Transport {
            message: error.without_url().to_string(),
            transient,
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

/// Everything an adapter needs for one call. The artifact path points at the
/// staged upload; the credential has already been resolved.
#[derive(Debug)]
pub struct InvocationRequest<'a> {
    pub artifact_path: &'a Path,
    pub file_name: &'a str,
    pub mime: &'static str,
    pub params: &'a EnhancementParameters,
    pub credential: &'a Credential,
}

#[async_trait]
pub trait InferenceBackend: Send + Sync + 'static {
    fn protocol(&self) -> BackendProtocol;

    async fn invoke(
        &self,
        request: &InvocationRequest<'_>,
    ) -> Result<RawInferenceResult, BackendError>;
}

pub type SharedInferenceBackend = Arc<dyn InferenceBackend>;

pub fn backend_for_profile(profile: &BackendProfile, client: Client) -> SharedInferenceBackend {
    match profile.protocol {
        BackendProtocol::GradioCall => {
            Arc::new(gradio_call::GradioCallBackend::from_profile(profile, client))
        }
        BackendProtocol::GradioQueue => {
            Arc::new(gradio_queue::GradioQueueBackend::from_profile(profile, client))
        }
        BackendProtocol::DirectHttp => {
            Arc::new(direct_http::DirectHttpBackend::from_profile(profile, client))
        }
    }
}

pub(crate) async fn read_upload(path: &Path) -> Result<Vec<u8>, BackendError> {
    tokio::fs::read(path).await.map_err(|error| {
        BackendError::protocol(format!("failed to read staged upload: {error}"))
    })
}

/// Sends the request and turns any non-2xx status into `BackendError::Status`.
pub(crate) async fn send_checked(request: RequestBuilder) -> Result<Response, BackendError> {
    let response = request.send().await.map_err(BackendError::from_transport)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = read_prefix(response, MAX_ERROR_BODY_BYTES).await;
    Err(BackendError::Status {
        status: status.as_u16(),
        body: truncate_for_message(String::from_utf8_lossy(body.as_slice()).trim()),
    })
}

pub(crate) async fn read_json(response: Response) -> Result<serde_json::Value, BackendError> {
    let raw = read_body_capped(response, MAX_RESPONSE_BYTES).await?;
    serde_json::from_slice(raw.as_slice())
        .map_err(|error| BackendError::protocol(format!("response is not valid JSON: {error}")))
}

/// Reads the whole body, failing once it grows past `limit`.
pub(crate) async fn read_body_capped(
    mut response: Response,
    limit: usize,
) -> Result<Vec<u8>, BackendError> {
    let too_large = || BackendError::protocol(format!("response body exceeds {limit} bytes"));
    if response
        .content_length()
        .is_some_and(|len| len > limit as u64)
    {
        return Err(too_large());
    }
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(BackendError::from_transport)?
    {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(chunk.as_ref());
    }
    Ok(body)
}

// Best effort: a transport error just ends the prefix.
async fn read_prefix(mut response: Response, limit: usize) -> Vec<u8> {
    let mut body = Vec::new();
    while body.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(limit - body.len());
                body.extend_from_slice(&chunk[..take]);
            }
            _ => break,
        }
    }
    body
}

pub(crate) fn truncate_for_message(raw: &str) -> String {
    if raw.chars().count() <= MAX_ERROR_BODY_CHARS {
        return raw.to_string();
    }
    let mut out = raw.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    async fn spawn_server() -> SocketAddr {
        let app = Router::new()
            .route("/image", get(|| async { vec![7u8; 4096] }))
            .route(
                "/failing",
                get(|| async { (StatusCode::BAD_GATEWAY, "x".repeat(1024 * 1024)) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    fn client() -> Client {
        Client::builder().no_proxy().build().expect("test client")
    }

    #[test]
    fn transient_classification_covers_server_errors_and_rate_limits() {
        let status = |status| BackendError::Status {
            status,
            body: String::new(),
        };
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(!BackendError::protocol("bad handshake").is_transient());
        assert!(!BackendError::Remote(String::from("oom")).is_transient());
        assert!(!BackendError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(BackendError::Transport {
            message: String::from("connection refused"),
            transient: true
        }
        .is_transient());
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(2000);
        let shown = truncate_for_message(body.as_str());
        assert_eq!(shown.len(), MAX_ERROR_BODY_CHARS + 3);
        assert!(shown.ends_with("..."));
        assert_eq!(truncate_for_message("short"), "short");
    }

    #[tokio::test]
    async fn response_bodies_are_read_up_to_a_limit() {
        let addr = spawn_server().await;
        let url = format!("http://{addr}/image");

        let response = send_checked(client().get(url.as_str())).await.expect("200");
        let body = read_body_capped(response, 8192).await.expect("fits");
        assert_eq!(body.len(), 4096);

        let response = send_checked(client().get(url.as_str())).await.expect("200");
        let err = read_body_capped(response, 1024).await.expect_err("over limit");
        assert!(
            matches!(&err, BackendError::Protocol(m) if m == "response body exceeds 1024 bytes"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn huge_error_bodies_are_cut_before_formatting() {
        let addr = spawn_server().await;
        let err = send_checked(client().get(format!("http://{addr}/failing")))
            .await
            .expect_err("502");
        match err {
            BackendError::Status { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body.len(), MAX_ERROR_BODY_CHARS + 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
