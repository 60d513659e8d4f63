use axum::{
    Router,
    routing::{get, post, put, delete},
    extract::{Path, Query, State, Json},
    http::{header, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use crate::error::Error;
use crate::observability::metrics::gather_metrics;
use crate::price_infra::{CredentialState, SourceStatus};
use crate::tracking::{PriceAlert, PriceTracker, SchedulerStatus, TrackerStatistics};
use crate::types::{EntityId, Price, PriceSnapshot, RunSummary, SourceId, TrackedEntity};

pub struct ApiState {
    pub tracker: Arc<PriceTracker>,
    pub default_interval: Duration,
}

pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/entities", get(list_entities).post(register_entity))
        .route("/entities/:id", delete(deactivate_entity))
        .route("/entities/:id/target", put(set_target_price))
        .route("/entities/:id/history", get(get_history))
        .route("/cycles", post(trigger_cycle))
        .route("/refresh", post(refresh_entities))
        .route("/deals", get(best_deals))
        .route("/alerts", get(price_alerts))
        .route("/stats", get(statistics))
        .route("/scheduler", get(scheduler_status))
        .route("/scheduler/start", post(start_scheduler))
        .route("/scheduler/stop", post(stop_scheduler))
        .route("/cleanup", post(cleanup))
        .route("/sources", get(source_statuses))
        .route("/sources/:id/reinstate", post(reinstate_source))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_status(err: Error) -> StatusCode {
    let status = match &err {
        Error::EntityNotFound(_) | Error::UnknownSource(_) => StatusCode::NOT_FOUND,
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::CredentialRejected { .. } | Error::NoActiveSources => StatusCode::BAD_GATEWAY,
        Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(status = status.as_u16(), "Request failed: {}", err);
    status
}

async fn health_check(State(state): State<Arc<ApiState>>) -> Result<&'static str, StatusCode> {
    state.tracker.health_check().await.map_err(error_status)?;
    Ok("OK")
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    include_inactive: bool,
}

async fn list_entities(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TrackedEntity>>, StatusCode> {
    let entities = state.tracker.list_entities(query.include_inactive).await.map_err(error_status)?;
    Ok(Json(entities))
}

#[derive(Deserialize)]
struct RegisterRequest {
    id: String,
    name: String,
    target_price: Option<Price>,
}

#[derive(Serialize)]
struct Changed {
    changed: bool,
}

async fn register_entity(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Changed>), StatusCode> {
    let changed = state
        .tracker
        .register_entity(EntityId::new(req.id), req.name, req.target_price)
        .await
        .map_err(error_status)?;
    let status = if changed { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(Changed { changed })))
}

async fn deactivate_entity(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<Changed>, StatusCode> {
    let changed = state
        .tracker
        .deactivate_entity(&EntityId::new(id))
        .await
        .map_err(error_status)?;
    Ok(Json(Changed { changed }))
}

#[derive(Deserialize)]
struct TargetRequest {
    target_price: Option<Price>,
}

async fn set_target_price(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(req): Json<TargetRequest>,
) -> Result<StatusCode, StatusCode> {
    state
        .tracker
        .set_target_price(&EntityId::new(id), req.target_price)
        .await
        .map_err(error_status)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct HistoryQuery {
    since: Option<DateTime<Utc>>,
}

async fn get_history(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<PriceSnapshot>>, StatusCode> {
    let since = query.since.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let history = state
        .tracker
        .get_history(&EntityId::new(id), since)
        .await
        .map_err(error_status)?;
    Ok(Json(history))
}

#[derive(Deserialize, Default)]
struct CycleRequest {
    max_batch_size: Option<usize>,
}

async fn trigger_cycle(
    State(state): State<Arc<ApiState>>,
    body: Option<Json<CycleRequest>>,
) -> Result<Json<RunSummary>, StatusCode> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let summary = state
        .tracker
        .trigger_cycle_now(req.max_batch_size)
        .await
        .map_err(error_status)?;
    Ok(Json(summary))
}

#[derive(Deserialize)]
struct RefreshRequest {
    ids: Vec<String>,
}

async fn refresh_entities(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<RunSummary>, StatusCode> {
    let ids: Vec<EntityId> = req.ids.into_iter().map(EntityId::new).collect();
    let summary = state.tracker.refresh_entities(&ids).await.map_err(error_status)?;
    Ok(Json(summary))
}

#[derive(Deserialize)]
struct DealsQuery {
    #[serde(default)]
    min_discount: u8,
    max_price: Option<Price>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

async fn best_deals(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DealsQuery>,
) -> Result<Json<Vec<PriceSnapshot>>, StatusCode> {
    let deals = state
        .tracker
        .get_best_deals(query.min_discount, query.max_price, query.limit)
        .await
        .map_err(error_status)?;
    Ok(Json(deals))
}

async fn price_alerts(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<PriceAlert>>, StatusCode> {
    Ok(Json(state.tracker.price_alerts().await.map_err(error_status)?))
}

async fn statistics(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<TrackerStatistics>, StatusCode> {
    Ok(Json(state.tracker.statistics().await.map_err(error_status)?))
}

async fn scheduler_status(State(state): State<Arc<ApiState>>) -> Json<SchedulerStatus> {
    Json(state.tracker.scheduler_status())
}

#[derive(Deserialize, Default)]
struct StartRequest {
    interval_secs: Option<f64>,
}

async fn start_scheduler(
    State(state): State<Arc<ApiState>>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<SchedulerStatus>, StatusCode> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let interval = match req.interval_secs {
        Some(secs) if secs > 0.0 => {
            Duration::try_from_secs_f64(secs).map_err(|_| StatusCode::BAD_REQUEST)?
        }
        Some(_) => return Err(StatusCode::BAD_REQUEST),
        None => state.default_interval,
    };
    let status = state.tracker.start_scheduler(interval).map_err(error_status)?;
    Ok(Json(status))
}

async fn stop_scheduler(State(state): State<Arc<ApiState>>) -> Json<SchedulerStatus> {
    Json(state.tracker.stop_scheduler().await)
}

#[derive(Deserialize)]
struct CleanupRequest {
    days: u32,
}

#[derive(Serialize)]
struct CleanupResponse {
    deleted: usize,
}

async fn cleanup(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CleanupRequest>,
) -> Result<Json<CleanupResponse>, StatusCode> {
    let deleted = state.tracker.cleanup_older_than(req.days).await.map_err(error_status)?;
    Ok(Json(CleanupResponse { deleted }))
}

async fn source_statuses(State(state): State<Arc<ApiState>>) -> Json<Vec<SourceStatus>> {
    Json(state.tracker.source_statuses())
}

async fn reinstate_source(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<CredentialState>, StatusCode> {
    let previous = state
        .tracker
        .reinstate_source(&SourceId::new(id))
        .map_err(error_status)?;
    Ok(Json(previous))
}
