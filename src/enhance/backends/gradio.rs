use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::{json, Value};

use super::{read_json, read_upload, send_checked, BackendError, InvocationRequest};
use crate::settings::profiles::BackendProfile;

/// URL layout shared by both Gradio protocols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradioEndpoints {
    root: String,
    api_name: String,
}

impl GradioEndpoints {
    pub fn from_profile(profile: &BackendProfile) -> Self {
        let base = profile.base_url.as_deref().unwrap_or_default();
        Self {
            root: format!("{}{}", base.trim_end_matches('/'), profile.api_prefix),
            api_name: profile.api_name.clone().unwrap_or_default(),
        }
    }

    pub fn upload_url(&self) -> String {
        format!("{}/upload", self.root)
    }

    pub fn run_url(&self) -> String {
        format!("{}/run{}", self.root, self.api_name)
    }

    pub fn call_url(&self) -> String {
        format!("{}/call{}", self.root, self.api_name)
    }

    pub fn poll_url(&self, event_id: &str) -> String {
        format!("{}/call{}/{}", self.root, self.api_name, event_id)
    }
}

/// Uploads the staged file and returns the `FileData` argument that refers to it.
pub async fn upload_file(
    client: &Client,
    endpoints: &GradioEndpoints,
    request: &InvocationRequest<'_>,
) -> Result<Value, BackendError> {
    let bytes = read_upload(request.artifact_path).await?;
    let part = Part::bytes(bytes)
        .file_name(request.file_name.to_string())
        .mime_str(request.mime)
        .map_err(|e| BackendError::protocol(format!("invalid mime '{}': {e}", request.mime)))?;
    let form = Form::new().part("files", part);

    let response = send_checked(
        client
            .post(endpoints.upload_url())
            .bearer_auth(request.credential.expose())
            .multipart(form),
    )
    .await?;
    let payload = read_json(response).await?;
    let path = payload
        .as_array()
        .and_then(|items| items.first())
        .and_then(Value::as_str)
        .filter(|path| !path.trim().is_empty())
        .ok_or_else(|| BackendError::protocol("upload response did not contain a file path"))?;

    Ok(json!({
        "path": path,
        "orig_name": request.file_name,
        "meta": {"_type": "gradio.FileData"}
    }))
}

/// `{"data": [file, params...]}` in the order the profile declares them.
pub fn call_payload(file: Value, request: &InvocationRequest<'_>) -> Value {
    let mut data = Vec::with_capacity(request.params.len() + 1);
    data.push(file);
    data.extend(request.params.positional());
    json!({ "data": data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::profiles::{ProfileSet, BUILTIN_PROFILE_NAME};

    #[test]
    fn endpoints_follow_prefix_and_api_name() {
        let set = ProfileSet::builtin();
        let profile = set.get(BUILTIN_PROFILE_NAME).expect("builtin");
        let endpoints = GradioEndpoints::from_profile(profile);
        assert_eq!(
            endpoints.upload_url(),
            "https://gokaygokay-tile-upscaler.hf.space/gradio_api/upload"
        );
        assert_eq!(
            endpoints.run_url(),
            "https://gokaygokay-tile-upscaler.hf.space/gradio_api/run/wrapper"
        );
        assert_eq!(
            endpoints.poll_url("abc123"),
            "https://gokaygokay-tile-upscaler.hf.space/gradio_api/call/wrapper/abc123"
        );

        let mut legacy = profile.clone();
        legacy.base_url = Some(String::from("http://127.0.0.1:7860/"));
        legacy.api_prefix = String::new();
        assert_eq!(
            GradioEndpoints::from_profile(&legacy).call_url(),
            "http://127.0.0.1:7860/call/wrapper"
        );
    }
}
