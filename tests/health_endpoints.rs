use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use enhance_backend_core::api::routes::{route_catalog, HttpMethod};
use enhance_backend_core::api::server::build_router;
use enhance_backend_core::settings::ServiceSettings;

fn test_settings() -> ServiceSettings {
    ServiceSettings {
        service_name: String::from("Photo restorer"),
        temp_dir: std::env::temp_dir().join(format!("enhance_health_{}", Uuid::new_v4().simple())),
        ..ServiceSettings::default()
    }
}

fn test_app() -> Router {
    build_router(&test_settings()).expect("router should build")
}

async fn send(app: Router, method: Method, path: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(path)
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("router should return response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn root_reports_service_is_running() {
    let (status, body) = send(test_app(), Method::GET, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Photo restorer is running"}));
}

#[tokio::test]
async fn health_lists_profiles_and_temp_usage() {
    let (status, body) = send(test_app(), Method::GET, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["service"], json!("Photo restorer"));
    assert_eq!(body["version"], json!(env!("CARGO_PKG_VERSION")));
    assert_eq!(body["route_count"], json!(route_catalog().len()));
    assert_eq!(body["default_profile"], json!("tile-upscaler"));
    assert_eq!(body["profiles"], json!(["tile-upscaler"]));
    assert_eq!(
        body["temp_artifacts"],
        json!({"acquired": 0, "released": 0, "live": 0})
    );
}

#[tokio::test]
async fn every_catalog_route_is_mounted() {
    let app = test_app();
    for route in route_catalog() {
        let path = route.path.replace("{profile}", "tile-upscaler");
        let method = match route.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        // Enhance routes without a multipart body are rejected, never unrouted.
        let (status, _) = send(app.clone(), method, path.as_str()).await;
        assert_ne!(status, StatusCode::NOT_FOUND, "{route} is not mounted");
        assert_ne!(status, StatusCode::METHOD_NOT_ALLOWED, "{route} is not mounted");
    }
}

#[tokio::test]
async fn catalog_method_is_the_only_one_accepted() {
    let app = test_app();
    for route in route_catalog() {
        let path = route.path.replace("{profile}", "tile-upscaler");
        let other = match route.method {
            HttpMethod::Get => Method::POST,
            HttpMethod::Post => Method::GET,
        };
        let (status, _) = send(app.clone(), other.clone(), path.as_str()).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{other} {path}");
    }
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let (status, _) = send(test_app(), Method::GET, "/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cors_preflight_is_answered_when_enabled() {
    let response = test_app()
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/enhance/")
                .header("origin", "https://app.example.test")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("router should return response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}
