use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::gradio::{call_payload, upload_file, GradioEndpoints};
use super::{read_json, send_checked, BackendError, InferenceBackend, InvocationRequest};
use crate::enhance::raw_result::RawInferenceResult;
use crate::settings::profiles::{BackendProfile, BackendProtocol};

/// Upload, then one blocking `run` call whose `data` member is the result.
#[derive(Debug, Clone)]
pub struct GradioCallBackend {
    client: Client,
    endpoints: GradioEndpoints,
}

impl GradioCallBackend {
    pub fn from_profile(profile: &BackendProfile, client: Client) -> Self {
        Self {
            client,
            endpoints: GradioEndpoints::from_profile(profile),
        }
    }
}

#[async_trait]
impl InferenceBackend for GradioCallBackend {
    fn protocol(&self) -> BackendProtocol {
        BackendProtocol::GradioCall
    }

    async fn invoke(
        &self,
        request: &InvocationRequest<'_>,
    ) -> Result<RawInferenceResult, BackendError> {
        let file = upload_file(&self.client, &self.endpoints, request).await?;
        debug!(url = %self.endpoints.run_url(), "calling gradio endpoint");
        let response = send_checked(
            self.client
                .post(self.endpoints.run_url())
                .bearer_auth(request.credential.expose())
                .json(&call_payload(file, request)),
        )
        .await?;
        let mut payload = read_json(response).await?;

        if let Some(data) = payload.get_mut("data") {
            return Ok(RawInferenceResult::from(data.take()));
        }
        match payload.get("error") {
            Some(Value::String(message)) => Err(BackendError::Remote(message.clone())),
            Some(other) if !other.is_null() => Err(BackendError::Remote(other.to_string())),
            _ => Err(BackendError::protocol("call response is missing 'data'")),
        }
    }
}
