use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::{Map, Value};

use super::{
    read_body_capped, read_json, read_upload, send_checked, BackendError, InferenceBackend,
    InvocationRequest, MAX_RESPONSE_BYTES,
};
use crate::enhance::raw_result::RawInferenceResult;
use crate::settings::profiles::{BackendProfile, BackendProtocol};

/// POSTs the image inline as a data URI next to the named parameters.
#[derive(Debug, Clone)]
pub struct DirectHttpBackend {
    client: Client,
    endpoint: String,
    image_field: String,
    input_key: Option<String>,
}

impl DirectHttpBackend {
    pub fn from_profile(profile: &BackendProfile, client: Client) -> Self {
        Self {
            client,
            endpoint: profile.endpoint.clone().unwrap_or_default(),
            image_field: profile.image_field.clone(),
            input_key: profile
                .input_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
        }
    }

    pub fn request_body(&self, image: &[u8], request: &InvocationRequest<'_>) -> Value {
        let mut fields: Map<String, Value> = request.params.named();
        fields.insert(
            self.image_field.clone(),
            Value::String(format!(
                "data:{};base64,{}",
                request.mime,
                BASE64_STANDARD.encode(image)
            )),
        );
        match self.input_key.as_deref() {
            Some(key) => {
                let mut wrapped = Map::new();
                wrapped.insert(key.to_string(), Value::Object(fields));
                Value::Object(wrapped)
            }
            None => Value::Object(fields),
        }
    }
}

#[async_trait]
impl InferenceBackend for DirectHttpBackend {
    fn protocol(&self) -> BackendProtocol {
        BackendProtocol::DirectHttp
    }

    async fn invoke(
        &self,
        request: &InvocationRequest<'_>,
    ) -> Result<RawInferenceResult, BackendError> {
        let image = read_upload(request.artifact_path).await?;
        let body = self.request_body(image.as_slice(), request);
        let response = send_checked(
            self.client
                .post(self.endpoint.as_str())
                .bearer_auth(request.credential.expose())
                .json(&body),
        )
        .await?;

        // Some services answer with the image itself instead of JSON.
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
            .unwrap_or_default();
        if content_type.starts_with("image/") {
            let bytes = read_body_capped(response, MAX_RESPONSE_BYTES).await?;
            return Ok(RawInferenceResult::Reference(format!(
                "data:{content_type};base64,{}",
                BASE64_STANDARD.encode(bytes.as_slice())
            )));
        }
        Ok(RawInferenceResult::from(read_json(response).await?))
    }
}
