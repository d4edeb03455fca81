/*!
REST API of the kernel

- Axum router over a shared [`ClusterRepository`]
- Routes: /health, /system, /clusters, /ras, /cache, /snapshots
- JSON responses; unknown clusters answer 404

When an API key is configured every route except /health requires a
matching `x-api-key` header.
*/

use crate::health::{HealthTracker, KernelHealth};
use crate::state::{Shared, SnapshotMap};
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use zbx1c_agent::cache::{EntryState, RecordKind};
use zbx1c_agent::discovery::{check_ras, LldDocument, RasStatus};
use zbx1c_agent::metrics::{InfobaseReport, SessionSummary};
use zbx1c_agent::records::normalize_cluster_id;
use zbx1c_agent::{
    ClusterMetricsSnapshot, ClusterRecord, ClusterRepository, InfobaseRecord, JobRecord, RacRunner,
    SessionRecord,
};

pub struct AppState<R: RacRunner> {
    pub repo: Arc<ClusterRepository<R>>,
    pub snapshots: Shared<SnapshotMap>,
    pub health: HealthTracker,
    pub api_key: Option<Arc<str>>,
    pub rac_path: String,
}

impl<R: RacRunner> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            snapshots: Arc::clone(&self.snapshots),
            health: self.health.clone(),
            api_key: self.api_key.clone(),
            rac_path: self.rac_path.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("cluster {0} not found")]
    ClusterNotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::ClusterNotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn require_api_key<R: RacRunner>(
    State(app): State<AppState<R>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

#[derive(Debug, Default, Deserialize)]
struct ClustersParams {
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RecordParams {
    infobase: Option<String>,
    #[serde(default)]
    active: bool,
}

#[derive(Debug, Deserialize)]
struct CacheParams {
    kind: RecordKind,
    cluster: Option<String>,
}

pub fn build_router<R: RacRunner>(app_state: AppState<R>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health::<R>))
        .route("/clusters", get(list_clusters::<R>))
        .route("/clusters/discovery", get(cluster_discovery::<R>))
        .route("/clusters/refresh", post(refresh_clusters::<R>))
        .route("/clusters/{id}", get(get_cluster::<R>))
        .route("/clusters/{id}/metrics", get(get_metrics::<R>))
        .route("/clusters/{id}/infobases", get(get_infobases::<R>))
        .route("/clusters/{id}/infobases/summary", get(get_infobase_summary::<R>))
        .route("/clusters/{id}/sessions", get(get_sessions::<R>))
        .route("/clusters/{id}/sessions/summary", get(get_sessions_summary::<R>))
        .route("/clusters/{id}/jobs", get(get_jobs::<R>))
        .route("/clusters/{id}/status", get(get_status::<R>))
        .route("/ras/status", get(get_ras_status::<R>))
        .route("/cache", get(get_cache_state::<R>))
        .route("/cache/clear", post(clear_cache::<R>))
        .route("/snapshots", get(list_snapshots::<R>))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_api_key::<R>,
        ))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health<R: RacRunner>(State(app): State<AppState<R>>) -> Json<KernelHealth> {
    let clusters = app.repo.cached_clusters().len();
    let snapshots = app.snapshots.lock().len();
    Json(app.health.get_health(clusters, snapshots))
}

// GET /clusters?refresh=true
async fn list_clusters<R: RacRunner>(
    State(app): State<AppState<R>>,
    Query(params): Query<ClustersParams>,
) -> Json<Vec<ClusterRecord>> {
    Json(app.repo.discover_clusters(!params.refresh).await)
}

// GET /clusters/discovery (Zabbix LLD)
async fn cluster_discovery<R: RacRunner>(State(app): State<AppState<R>>) -> Json<LldDocument> {
    let clusters = app.repo.discover_clusters_with_status(true).await;
    Json(LldDocument::from_clusters(&clusters))
}

// POST /clusters/refresh
async fn refresh_clusters<R: RacRunner>(
    State(app): State<AppState<R>>,
) -> Json<Vec<ClusterRecord>> {
    app.repo.invalidate_clusters();
    Json(app.repo.discover_clusters_with_status(false).await)
}

async fn get_cluster<R: RacRunner>(
    State(app): State<AppState<R>>,
    Path(id): Path<String>,
) -> Result<Json<ClusterRecord>, ApiError> {
    let id = normalize_cluster_id(&id);
    app.repo
        .find_cluster(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::ClusterNotFound(id.to_string()))
}

// GET /clusters/{id}/metrics, also kept as the latest snapshot
async fn get_metrics<R: RacRunner>(
    State(app): State<AppState<R>>,
    Path(id): Path<String>,
) -> Json<ClusterMetricsSnapshot> {
    let id = normalize_cluster_id(&id);
    let snapshot = app.repo.get_cluster_metrics(id).await;
    // Only discovered clusters are tracked, so arbitrary ids cannot grow the map
    if app.repo.find_cluster(id).await.is_some() {
        app.snapshots
            .lock()
            .insert(snapshot.cluster_id.clone(), snapshot.clone());
    }
    Json(snapshot)
}

async fn get_infobases<R: RacRunner>(
    State(app): State<AppState<R>>,
    Path(id): Path<String>,
) -> Json<Vec<InfobaseRecord>> {
    Json(app.repo.get_infobases(normalize_cluster_id(&id), true).await)
}

// GET /clusters/{id}/sessions?infobase=&active=
async fn get_sessions<R: RacRunner>(
    State(app): State<AppState<R>>,
    Path(id): Path<String>,
    Query(params): Query<RecordParams>,
) -> Json<Vec<SessionRecord>> {
    let id = normalize_cluster_id(&id);
    let sessions = if params.active {
        app.repo.get_active_sessions(id).await
    } else {
        app.repo.get_sessions(id).await
    };
    let infobase = params.infobase.as_deref();
    Json(
        sessions
            .into_iter()
            .filter(|s| infobase.map_or(true, |ib| s.infobase() == Some(ib)))
            .collect(),
    )
}

async fn get_infobase_summary<R: RacRunner>(
    State(app): State<AppState<R>>,
    Path(id): Path<String>,
) -> Json<InfobaseReport> {
    Json(app.repo.get_infobase_summary(normalize_cluster_id(&id)).await)
}

async fn get_sessions_summary<R: RacRunner>(
    State(app): State<AppState<R>>,
    Path(id): Path<String>,
) -> Json<SessionSummary> {
    Json(app.repo.get_sessions_summary(normalize_cluster_id(&id)).await)
}

// GET /clusters/{id}/jobs?infobase=&active=
async fn get_jobs<R: RacRunner>(
    State(app): State<AppState<R>>,
    Path(id): Path<String>,
    Query(params): Query<RecordParams>,
) -> Json<Vec<JobRecord>> {
    let id = normalize_cluster_id(&id);
    let jobs = if params.active {
        app.repo.get_active_jobs(id).await
    } else {
        app.repo.get_jobs(id).await
    };
    let infobase = params.infobase.as_deref();
    Json(
        jobs.into_iter()
            .filter(|j| infobase.map_or(true, |ib| j.infobase() == Some(ib)))
            .collect(),
    )
}

async fn get_status<R: RacRunner>(
    State(app): State<AppState<R>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let id = normalize_cluster_id(&id);
    let status = app.repo.refresh_cluster_status(id).await;
    Json(json!({ "cluster_id": id, "status": status }))
}

async fn get_ras_status<R: RacRunner>(State(app): State<AppState<R>>) -> Json<RasStatus> {
    let endpoint = app.repo.endpoint();
    Json(
        check_ras(
            &endpoint.host,
            endpoint.port,
            &app.rac_path,
            app.repo.options().probe_timeout,
        )
        .await,
    )
}

// GET /cache?kind=sessions&cluster=
async fn get_cache_state<R: RacRunner>(
    State(app): State<AppState<R>>,
    Query(params): Query<CacheParams>,
) -> Json<EntryState> {
    let cluster = params.cluster.as_deref().map(normalize_cluster_id);
    Json(app.repo.entry_state(params.kind, cluster))
}

async fn clear_cache<R: RacRunner>(State(app): State<AppState<R>>) -> Json<serde_json::Value> {
    app.repo.clear_cache();
    Json(json!({ "status": "cleared" }))
}

// GET /snapshots (latest per cluster, ordered by id)
async fn list_snapshots<R: RacRunner>(
    State(app): State<AppState<R>>,
) -> Json<Vec<ClusterMetricsSnapshot>> {
    let mut list: Vec<ClusterMetricsSnapshot> = app.snapshots.lock().values().cloned().collect();
    list.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));
    Json(list)
}
