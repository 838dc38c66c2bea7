//! Web server module for Fetcher.
//!
//! Exposes the registry as a REST API under `/api/fetcher`.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::registry::{Registry, RegistryError};
use crate::target::{TargetSpec, TargetSummary};

/// Default request body limit (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1 << 20;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub max_body_bytes: usize,
}

impl AppState {
    /// State with the default body limit.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    targets: usize,
}

/// Response for register and update.
#[derive(Debug, Serialize)]
struct IdResponse {
    id: u64,
}

/// Request failures, all reported as plain-text bodies.
#[derive(Debug)]
pub enum ApiError {
    /// Path id is not a positive integer.
    InvalidId(String),
    /// Request body is not a valid target document.
    MalformedBody(serde_json::Error),
    /// Registry rejected the operation.
    Registry(RegistryError),
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InvalidId(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::MalformedBody(e) => (StatusCode::BAD_REQUEST, format!("malformed request body: {e}")),
            Self::Registry(e @ (RegistryError::Validation(_) | RegistryError::NotFound(_))) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            Self::Registry(e @ RegistryError::ShutdownTimeout(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        (status, message).into_response()
    }
}

/// Parse a path id, which must be a positive integer.
fn parse_id(raw: &str) -> Result<u64, ApiError> {
    match raw.parse::<u64>() {
        Ok(0) => Err(ApiError::InvalidId(
            "incorrect id: 0, must be a positive value".to_string(),
        )),
        Ok(id) => Ok(id),
        Err(_) => Err(ApiError::InvalidId(format!("incorrect id format: {raw:?}"))),
    }
}

/// Decode a target document regardless of the declared content type.
fn parse_spec(body: &Bytes) -> Result<TargetSpec, ApiError> {
    serde_json::from_slice(body).map_err(ApiError::MalformedBody)
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route(
            "/api/fetcher",
            get(list_handler).post(register_handler).put(update_handler),
        )
        .route("/api/fetcher/{id}", get(get_handler).delete(remove_handler))
        .route("/api/fetcher/{id}/history", get(history_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Serve the API on `listener` until `signal` resolves and open requests
/// drain, then stop every worker.
///
/// Workers are stopped only after the drain, so targets registered by
/// in-flight requests are stopped too.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(signal)
        .await?;

    tracing::info!("Stopping workers...");
    if let Err(e) = registry.shutdown().await {
        tracing::error!("Failed to stop workers: {}", e);
    }
    Ok(())
}

/// Liveness probe.
async fn healthz_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        targets: state.registry.len().await,
    })
}

/// GET /api/fetcher - all targets ordered by id, without history.
async fn list_handler(State(state): State<Arc<AppState>>) -> Json<Vec<TargetSummary>> {
    Json(state.registry.list().await)
}

/// POST /api/fetcher - register a target.
async fn register_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<IdResponse>, ApiError> {
    let spec = parse_spec(&body)?;
    let id = state.registry.register(spec).await?;
    Ok(Json(IdResponse { id }))
}

/// PUT /api/fetcher - replace the target named by the body's id.
async fn update_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<IdResponse>, ApiError> {
    let spec = parse_spec(&body)?;
    let id = state.registry.update(spec.id, spec).await?;
    Ok(Json(IdResponse { id }))
}

/// GET /api/fetcher/{id} - one target without history, or 204 if absent.
async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&raw_id)?;
    match state.registry.get(id).await {
        Ok(target) => Ok(Json(target).into_response()),
        Err(RegistryError::NotFound(_)) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Err(e.into()),
    }
}

/// DELETE /api/fetcher/{id} - remove a target, returning it with its history.
async fn remove_handler(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&raw_id)?;
    let removed = state.registry.remove(id).await?;
    Ok(Json(removed).into_response())
}

/// GET /api/fetcher/{id}/history - the target's fetch records.
async fn history_handler(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&raw_id)?;
    let history = state.registry.history(id).await?;
    Ok(Json(history).into_response())
}
