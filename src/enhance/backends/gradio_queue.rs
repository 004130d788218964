use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::gradio::{call_payload, upload_file, GradioEndpoints};
use super::sse::{SseDecoder, SseEvent, MAX_EVENT_BYTES};
use super::{read_json, send_checked, BackendError, InferenceBackend, InvocationRequest};
use crate::enhance::raw_result::RawInferenceResult;
use crate::settings::profiles::{BackendProfile, BackendProtocol};

/// Submit a job, then wait on its event stream until it completes or the
/// job timeout passes.
#[derive(Debug, Clone)]
pub struct GradioQueueBackend {
    client: Client,
    endpoints: GradioEndpoints,
    job_timeout: Duration,
    poll_interval: Duration,
}

enum PollOutcome {
    Complete(RawInferenceResult),
    Pending,
}

impl GradioQueueBackend {
    pub fn from_profile(profile: &BackendProfile, client: Client) -> Self {
        Self {
            client,
            endpoints: GradioEndpoints::from_profile(profile),
            job_timeout: profile.timeout(),
            poll_interval: profile.poll_interval(),
        }
    }

    async fn submit(&self, request: &InvocationRequest<'_>) -> Result<String, BackendError> {
        let file = upload_file(&self.client, &self.endpoints, request).await?;
        let response = send_checked(
            self.client
                .post(self.endpoints.call_url())
                .bearer_auth(request.credential.expose())
                .json(&call_payload(file, request)),
        )
        .await?;
        let payload = read_json(response).await?;
        payload
            .get("event_id")
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| BackendError::protocol("submit response did not contain an event_id"))
    }

    async fn wait_for_result(
        &self,
        event_id: &str,
        request: &InvocationRequest<'_>,
    ) -> Result<RawInferenceResult, BackendError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.poll_once(event_id, request).await? {
                PollOutcome::Complete(result) => return Ok(result),
                PollOutcome::Pending => {
                    debug!(event_id, attempt, "job stream ended without result; polling again");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn poll_once(
        &self,
        event_id: &str,
        request: &InvocationRequest<'_>,
    ) -> Result<PollOutcome, BackendError> {
        let mut response = send_checked(
            self.client
                .get(self.endpoints.poll_url(event_id))
                .bearer_auth(request.credential.expose()),
        )
        .await?;

        let mut decoder = SseDecoder::with_limit(MAX_EVENT_BYTES);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(BackendError::from_transport)?
        {
            for event in decoder.push(chunk.as_ref())? {
                if let Some(outcome) = interpret_event(event)? {
                    return Ok(outcome);
                }
            }
        }
        match decoder.finish()? {
            Some(event) => Ok(interpret_event(event)?.unwrap_or(PollOutcome::Pending)),
            None => Ok(PollOutcome::Pending),
        }
    }
}

fn interpret_event(event: SseEvent) -> Result<Option<PollOutcome>, BackendError> {
    match event.event.as_str() {
        "complete" => {
            let value = serde_json::from_str::<Value>(event.data.as_str()).map_err(|error| {
                BackendError::protocol(format!("completion payload is not valid JSON: {error}"))
            })?;
            Ok(Some(PollOutcome::Complete(RawInferenceResult::from(value))))
        }
        "error" => {
            let trimmed = event.data.trim();
            let message = if trimmed.is_empty() || trimmed == "null" {
                String::from("job failed without details")
            } else {
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(Value::String(text)) => text,
                    Ok(other) => other.to_string(),
                    Err(_) => trimmed.to_string(),
                }
            };
            Err(BackendError::Remote(message))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl InferenceBackend for GradioQueueBackend {
    fn protocol(&self) -> BackendProtocol {
        BackendProtocol::GradioQueue
    }

    async fn invoke(
        &self,
        request: &InvocationRequest<'_>,
    ) -> Result<RawInferenceResult, BackendError> {
        let event_id = self.submit(request).await?;
        debug!(event_id = %event_id, "submitted gradio job");
        tokio::time::timeout(self.job_timeout, self.wait_for_result(event_id.as_str(), request))
            .await
            .map_err(|_| BackendError::Timeout(self.job_timeout))?
    }
}
