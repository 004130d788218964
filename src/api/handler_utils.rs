use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::api::error::ERROR_KIND_HEADER;
use crate::enhance::error::ErrorKind;

pub const IMAGE_CONTENT_TYPE: &str = "image/png";

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    detail: String,
}

/// `{"detail": ...}` body with the machine-readable kind in a header.
pub fn error_response(status: StatusCode, kind: ErrorKind, detail: impl Into<String>) -> Response {
    let mut response = (
        status,
        Json(ErrorResponse {
            detail: detail.into(),
        }),
    )
        .into_response();
    response.headers_mut().insert(
        ERROR_KIND_HEADER,
        HeaderValue::from_static(kind.as_str()),
    );
    response
}

pub fn internal_error(message: impl Into<String>) -> Response {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Internal,
        "Internal server error",
    )
}

pub fn image_response(bytes: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, HeaderValue::from_static(IMAGE_CONTENT_TYPE))],
        bytes,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use super::*;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        serde_json::from_slice(bytes.as_ref()).expect("body should be json")
    }

    #[tokio::test]
    async fn error_body_is_detail_only_with_kind_header() {
        let response = error_response(
            StatusCode::BAD_REQUEST,
            ErrorKind::Validation,
            "Unsupported file type",
        );
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response
                .headers()
                .get(ERROR_KIND_HEADER)
                .and_then(|v| v.to_str().ok()),
            Some("validation")
        );
        assert_eq!(
            body_json(response).await,
            json!({"detail": "Unsupported file type"})
        );
    }

    #[tokio::test]
    async fn internal_error_is_sanitized() {
        let response = internal_error("join error: task 12 panicked at src/enhance.rs");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"detail": "Internal server error"})
        );
    }

    #[test]
    fn image_response_is_png() {
        let response = image_response(b"png".to_vec());
        assert_eq!(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("image/png")
        );
    }
}
