use std::collections::HashMap;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::task::JoinHandle;

use crate::api::error::ApiError;
use crate::api::handler_utils::{image_response, internal_error};
use crate::api::server::AppState;
use crate::enhance::orchestrator::EnhanceRequest;

const FILE_FIELD: &str = "file";
const PROFILE_FIELD: &str = "profile";

pub async fn enhance_handler(State(state): State<AppState>, multipart: Multipart) -> Response {
    run_enhance(state, None, multipart).await
}

pub async fn enhance_profile_handler(
    State(state): State<AppState>,
    Path(profile): Path<String>,
    multipart: Multipart,
) -> Response {
    run_enhance(state, Some(profile), multipart).await
}

async fn run_enhance(state: AppState, path_profile: Option<String>, multipart: Multipart) -> Response {
    let mut request = match read_form(multipart, state.max_upload_bytes).await {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    if path_profile.is_some() {
        request.profile = path_profile;
    }

    // The pipeline runs in its own task so a panic becomes a 500; dropping the
    // guard (client went away) aborts it, which releases the staged upload.
    let service = state.enhance.clone();
    let mut task = AbortOnDrop(tokio::spawn(async move { service.enhance(request).await }));
    match (&mut task.0).await {
        Ok(Ok(image)) => image_response(image.bytes),
        Ok(Err(error)) => ApiError::from(error).into_response(),
        Err(join_error) => internal_error(format!("enhance task failed: {join_error}")),
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn read_form(
    mut multipart: Multipart,
    max_upload_bytes: usize,
) -> Result<EnhanceRequest, ApiError> {
    let form_error = |error: MultipartError| {
        if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::payload_too_large(max_upload_bytes)
        } else {
            ApiError::bad_request(format!("Invalid multipart body: {}", error.body_text()))
        }
    };

    let mut file = None;
    let mut profile = None;
    let mut fields = HashMap::new();
    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            FILE_FIELD => {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(form_error)?;
                file = Some((file_name, bytes.to_vec()));
            }
            PROFILE_FIELD => profile = Some(field.text().await.map_err(form_error)?),
            _ => {
                let value = field.text().await.map_err(form_error)?;
                fields.insert(name, value);
            }
        }
    }

    let (file_name, bytes) =
        file.ok_or_else(|| ApiError::bad_request("Missing required field 'file'"))?;
    Ok(EnhanceRequest {
        file_name,
        bytes,
        profile,
        fields,
    })
}
