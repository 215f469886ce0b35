//! Web server module for quarry.
//!
//! JSON control and inspection API: health probes, worker liveness, cycle
//! clocks with force-reset, hourly budgets, the dedup ledger and hunt
//! statistics.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::config::{ConfigProvider, DEFAULT_HOURLY_CAP};
use crate::storage::{
    CapStatus, CycleState, Epoch, HuntStat, ProcessedCount, ServiceType, StorageError,
    StorageHandles,
};
use crate::worker::{WorkerStatus, WorkerSupervisor};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageHandles,
    pub supervisor: WorkerSupervisor,
    pub config: Arc<dyn ConfigProvider>,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
}

#[derive(Serialize)]
struct CapResponse {
    service_type: ServiceType,
    #[serde(flatten)]
    status: CapStatus,
}

#[derive(Serialize)]
struct LedgerResponse {
    epoch: Option<Epoch>,
    processed: Vec<ProcessedCount>,
}

#[derive(Serialize)]
struct ResetResponse {
    cleared: u64,
    at: DateTime<Utc>,
}

/// Error returned by API handlers, rendered as `{"error": "..."}`.
#[derive(Debug)]
enum ApiError {
    UnknownService(String),
    NotFound(String),
    Storage(StorageError),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::UnknownService(raw) => {
                (StatusCode::NOT_FOUND, format!("unknown service type: {raw}"))
            }
            Self::NotFound(what) => (StatusCode::NOT_FOUND, what),
            Self::Storage(e) => {
                tracing::error!(error = %e, "API storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

fn parse_service(raw: &str) -> Result<ServiceType, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::UnknownService(raw.to_string()))
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/api/workers", get(workers_handler))
        .route("/api/cycles", get(cycles_handler))
        .route("/api/cycles/{service}", get(cycle_handler))
        .route("/api/cycles/{service}/reset", post(cycle_reset_handler))
        .route("/api/caps", get(caps_handler))
        .route("/api/caps/{service}", get(cap_handler))
        .route("/api/ledger", get(ledger_handler))
        .route("/api/ledger/reset", post(ledger_reset_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/stats/reset", post(stats_reset_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        db: None,
    })
}

/// Readiness probe that checks SQLite availability.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.storage.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ok".to_string(),
            db: Some("ready".to_string()),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready".to_string(),
                    db: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

async fn workers_handler(State(state): State<Arc<AppState>>) -> Json<Vec<WorkerStatus>> {
    Json(state.supervisor.statuses().await)
}

async fn cycles_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CycleState>>, ApiError> {
    Ok(Json(state.storage.clock.list().await?))
}

async fn cycle_handler(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<CycleState>, ApiError> {
    let service_type = parse_service(&service)?;
    state
        .storage
        .clock
        .get(service_type)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no cycle state for {service_type}")))
}

/// Make the next cycle due now; the worker picks it up within one tick.
async fn cycle_reset_handler(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<CycleState>, ApiError> {
    let service_type = parse_service(&service)?;
    Ok(Json(state.storage.clock.force_reset(service_type).await?))
}

/// Configured hourly cap, or the default when the service is absent or the
/// configuration cannot be read.
async fn hourly_cap(state: &AppState, service_type: ServiceType) -> u32 {
    match state.config.load().await {
        Ok(config) => config
            .service(service_type)
            .map_or(DEFAULT_HOURLY_CAP, |s| s.hourly_cap),
        Err(e) => {
            tracing::warn!(error = %e, "Configuration load failed; using default cap");
            DEFAULT_HOURLY_CAP
        }
    }
}

async fn caps_handler(State(state): State<Arc<AppState>>) -> Json<Vec<CapResponse>> {
    let mut caps = Vec::new();
    for service_type in ServiceType::iter() {
        let limit = hourly_cap(&state, service_type).await;
        caps.push(CapResponse {
            service_type,
            status: state.storage.limiter.status(service_type, limit).await,
        });
    }
    Json(caps)
}

async fn cap_handler(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<CapResponse>, ApiError> {
    let service_type = parse_service(&service)?;
    let limit = hourly_cap(&state, service_type).await;
    Ok(Json(CapResponse {
        service_type,
        status: state.storage.limiter.status(service_type, limit).await,
    }))
}

async fn ledger_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LedgerResponse>, ApiError> {
    Ok(Json(LedgerResponse {
        epoch: state.storage.ledger.epoch().await?,
        processed: state.storage.ledger.processed_counts().await?,
    }))
}

async fn ledger_reset_handler(State(state): State<Arc<AppState>>) -> Result<Json<Epoch>, ApiError> {
    Ok(Json(state.storage.ledger.reset_all().await?))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<HuntStat>>, ApiError> {
    Ok(Json(state.storage.stats.list().await?))
}

async fn stats_reset_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResetResponse>, ApiError> {
    let cleared = state.storage.stats.reset().await?;
    Ok(Json(ResetResponse {
        cleared,
        at: Utc::now(),
    }))
}
