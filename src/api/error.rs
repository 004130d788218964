use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::api::handler_utils::error_response;
use crate::enhance::error::{EnhanceError, ErrorKind};

pub const ERROR_KIND_HEADER: &str = "x-error-kind";

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Configuration
        | ErrorKind::BackendInvocation
        | ErrorKind::BackendTimeout
        | ErrorKind::MalformedResult
        | ErrorKind::Download
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: ErrorKind,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::Validation, detail)
    }

    pub fn payload_too_large(limit_bytes: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::Validation,
            format!("Upload exceeds the {limit_bytes} byte limit"),
        )
    }
}

impl From<EnhanceError> for ApiError {
    fn from(error: EnhanceError) -> Self {
        Self::new(status_for(error.kind), error.kind, error.detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(self.status, self.kind, self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhance::EnhanceStage;

    #[test]
    fn only_validation_maps_to_client_errors() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        for kind in [
            ErrorKind::Configuration,
            ErrorKind::BackendInvocation,
            ErrorKind::BackendTimeout,
            ErrorKind::MalformedResult,
            ErrorKind::Download,
            ErrorKind::Internal,
        ] {
            assert_eq!(status_for(kind), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn enhance_error_keeps_public_detail_only() {
        let api = ApiError::from(EnhanceError::internal(EnhanceStage::Stage, "disk full"));
        assert_eq!(api.detail, "Internal server error");
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
