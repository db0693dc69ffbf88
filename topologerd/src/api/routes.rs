use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use shared::protocol::{API_PREFIX, DEFAULT_PATH_LIMIT, DEFAULT_ROUTER_LIMIT, MAX_LIST_LIMIT};
use shared::types::{Hop, MapProjection, PathDetail, PathSummary, RouterSummary};
use crate::error::TraceError;
use crate::service::{TraceReport, TracerouteService};
use crate::store::db::{PathFilter, RouterFilter};

#[derive(Clone)]
pub struct AppState {
    pub service: TracerouteService,
    pub hash_rx: watch::Receiver<String>,
}

#[derive(Serialize)]
pub struct SystemResponse {
    pub name: String,
    pub address: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct TraceResponse {
    pub success: bool,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hops: Option<Vec<Hop>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct TraceQuery {
    pub target: Option<String>,
}

#[derive(Deserialize)]
pub struct TraceRequest {
    pub target: Option<String>,
}

#[derive(Deserialize)]
pub struct PathQuery {
    pub target: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Deserialize)]
pub struct RouterQuery {
    pub country: Option<String>,
    pub city: Option<String>,
    pub limit: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/system", get(get_system))
        .route("/traceroute", get(get_traceroute).post(post_traceroute))
        .route("/paths", get(list_paths))
        .route("/paths/:id", get(get_path))
        .route("/routers", get(list_routers))
        .route("/map", get(get_map))
        .route("/map/hash", get(get_hash));

    Router::new().nest(API_PREFIX, api).with_state(state)
}

async fn get_system(State(state): State<AppState>) -> Json<SystemResponse> {
    let system = state.service.system();
    Json(SystemResponse {
        name: system.name.clone(),
        address: system.address.clone(),
        description: system.description.clone(),
    })
}

async fn get_traceroute(
    State(state): State<AppState>,
    Query(params): Query<TraceQuery>,
) -> (StatusCode, Json<TraceResponse>) {
    run(&state, params.target.unwrap_or_default()).await
}

async fn post_traceroute(
    State(state): State<AppState>,
    body: Result<Json<TraceRequest>, JsonRejection>,
) -> (StatusCode, Json<TraceResponse>) {
    match body {
        Ok(Json(request)) => run(&state, request.target.unwrap_or_default()).await,
        Err(e) => {
            tracing::warn!("Invalid traceroute request body: {}", e);
            failure(StatusCode::BAD_REQUEST, String::new(), "Invalid request body".to_string())
        }
    }
}

async fn run(state: &AppState, target: String) -> (StatusCode, Json<TraceResponse>) {
    match state.service.run_traceroute(&target).await {
        Ok(report) => (StatusCode::OK, Json(success(report))),
        Err(e) => {
            if e.is_rejection() {
                tracing::warn!("Rejected traceroute target {:?}: {}", target, e);
            }
            failure(status_for(&e), target, e.to_string())
        }
    }
}

fn success(report: TraceReport) -> TraceResponse {
    TraceResponse {
        success: true,
        target: report.target,
        hops: Some(report.hops),
        path_id: report.path_id,
        error: None,
    }
}

fn failure(status: StatusCode, target: String, error: String) -> (StatusCode, Json<TraceResponse>) {
    (
        status,
        Json(TraceResponse {
            success: false,
            target,
            hops: None,
            path_id: None,
            error: Some(error),
        }),
    )
}

fn status_for(err: &TraceError) -> StatusCode {
    match err {
        TraceError::MissingTarget | TraceError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
        TraceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        TraceError::ToolFailed(_) | TraceError::OutputTooLarge(_) => StatusCode::BAD_GATEWAY,
        TraceError::UnsupportedPlatform(_) | TraceError::ToolMissing(_) | TraceError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn clamp_limit(limit: Option<u32>, default: u32) -> u32 {
    limit.unwrap_or(default).min(MAX_LIST_LIMIT)
}

/// Empty query parameters are treated as absent
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

async fn list_paths(
    State(state): State<AppState>,
    Query(params): Query<PathQuery>,
) -> Result<Json<Vec<PathSummary>>, StatusCode> {
    let filter = PathFilter {
        target: non_empty(params.target),
        limit: clamp_limit(params.limit, DEFAULT_PATH_LIMIT),
    };

    state
        .service
        .store()
        .list_paths(filter)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to query paths: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn get_path(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PathDetail>, StatusCode> {
    state
        .service
        .store()
        .get_path(id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to query path {}: {}", id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn list_routers(
    State(state): State<AppState>,
    Query(params): Query<RouterQuery>,
) -> Result<Json<Vec<RouterSummary>>, StatusCode> {
    let filter = RouterFilter {
        country: non_empty(params.country),
        city: non_empty(params.city),
        limit: clamp_limit(params.limit, DEFAULT_ROUTER_LIMIT),
    };

    state
        .service
        .store()
        .list_routers(filter)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to query routers: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn get_map(State(state): State<AppState>) -> Result<Json<MapProjection>, StatusCode> {
    state
        .service
        .store()
        .map_projection()
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to build map projection: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}
