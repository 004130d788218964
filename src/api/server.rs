use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::{Json, Router};
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::api::enhance::{enhance_handler, enhance_profile_handler};
use crate::api::routes::{route_catalog, HttpMethod, RouteDefinition, RouteId};
use crate::enhance::fetcher::ImageFetcher;
use crate::enhance::orchestrator::{BackendRegistry, EnhanceService};
use crate::enhance::temp_store::TempStore;
use crate::settings::credentials::CredentialStore;
use crate::settings::{ServiceSettings, SettingsError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct AppState {
    pub service_name: Arc<str>,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub route_count: usize,
    pub max_upload_bytes: usize,
    pub enhance: EnhanceService,
}

impl AppState {
    pub fn new(settings: &ServiceSettings, route_count: usize, enhance: EnhanceService) -> Self {
        Self {
            service_name: Arc::from(settings.service_name.as_str()),
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            route_count,
            max_upload_bytes: settings.max_upload_bytes,
            enhance,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("failed to bind or serve on {bind}: {source}")]
    Io {
        bind: String,
        #[source]
        source: std::io::Error,
    },
}

pub fn build_http_client() -> Result<Client, SettingsError> {
    Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|error| SettingsError::HttpClient(error.to_string()))
}

/// Wires the production service: profiles from settings, one shared HTTP
/// client, credentials from the environment and dotenv file.
pub fn build_enhance_service(settings: &ServiceSettings) -> Result<EnhanceService, SettingsError> {
    let profiles = settings.load_profiles()?;
    let client = build_http_client()?;
    let registry = BackendRegistry::from_profiles(&profiles, &client);
    Ok(EnhanceService::new(
        registry,
        TempStore::new(settings.temp_dir.clone()),
        ImageFetcher::new(client, settings.download_timeout, settings.max_download_bytes),
        CredentialStore::from_env_and_dotenv(settings.dotenv_path.clone()),
    ))
}

pub fn build_router(settings: &ServiceSettings) -> Result<Router, SettingsError> {
    let service = build_enhance_service(settings)?;
    Ok(build_router_with_service(settings, service))
}

pub fn build_router_with_service(settings: &ServiceSettings, service: EnhanceService) -> Router {
    let catalog = route_catalog();
    let state = AppState::new(settings, catalog.len(), service);

    let mut router = Router::new();
    for route in catalog {
        debug!(%route, "mounting route");
        router = router.route(route.path, method_router_for(route));
    }

    let router = router
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .layer(TraceLayer::new_for_http());
    let router = if settings.cors_allow_all {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };
    router.with_state(state)
}

pub async fn serve(settings: ServiceSettings) -> Result<(), ServeError> {
    let app = build_router(&settings)?;
    let io_error = |source| ServeError::Io {
        bind: settings.bind.clone(),
        source,
    };
    let listener = tokio::net::TcpListener::bind(settings.bind.as_str())
        .await
        .map_err(io_error)?;
    info!(
        bind = %settings.bind,
        service = %settings.service_name,
        temp_dir = %settings.temp_dir.display(),
        "starting enhancement proxy"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(io_error)
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received, draining connections");
}

fn method_router_for(route: RouteDefinition) -> MethodRouter<AppState> {
    let filter = method_filter(route.method);
    match route.id {
        RouteId::Root => on(filter, root_handler),
        RouteId::Health => on(filter, health_handler),
        RouteId::Enhance => on(filter, enhance_handler),
        RouteId::EnhanceProfile => on(filter, enhance_profile_handler),
    }
}

fn method_filter(method: HttpMethod) -> MethodFilter {
    match method {
        HttpMethod::Get => MethodFilter::GET,
        HttpMethod::Post => MethodFilter::POST,
    }
}

async fn root_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "message": format!("{} is running", state.service_name) }))
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let registry = state.enhance.registry();
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": &*state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "route_count": state.route_count,
            "default_profile": registry.default_profile(),
            "profiles": registry.profile_names(),
            "temp_artifacts": state.enhance.temp_store().stats(),
        })),
    )
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
