use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use server_api::{
    candidate_timeline, change_candidate_stage, create_candidate, create_job, get_assessment,
    list_candidates, list_jobs, reorder_job, update_job, upsert_assessment, ApiContext,
};
use shared::{
    domain::{CandidateId, JobId},
    error::{ApiError, ErrorCode},
    protocol::{
        ChangeStageRequest, CreateCandidateRequest, CreateJobRequest, ListCandidatesQuery,
        ListJobsQuery, ReorderJobRequest, UpdateJobRequest, UpsertAssessmentRequest,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

mod config;
mod seed;

use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 256 * 1024;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|err| {
        error!(
            %database_url,
            %err,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        err
    })?;

    if settings.seed_demo_data {
        seed::seed_demo_data(&storage).await?;
    }

    let state = AppState {
        api: ApiContext { storage },
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/jobs", get(http_list_jobs).post(http_create_job))
        .route("/jobs/:job_id", patch(http_update_job))
        .route("/jobs/:job_id/reorder", patch(http_reorder_job))
        .route(
            "/jobs/:job_id/assessment",
            get(http_get_assessment).put(http_put_assessment),
        )
        .route(
            "/candidates",
            get(http_list_candidates).post(http_create_candidate),
        )
        .route("/candidates/:candidate_id", patch(http_change_stage))
        .route(
            "/candidates/:candidate_id/timeline",
            get(http_candidate_timeline),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable"),
    }
}

async fn http_list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<shared::protocol::JobPage>, (StatusCode, Json<ApiError>)> {
    let page = list_jobs(&state.api, &query).await.map_err(reject)?;
    Ok(Json(page))
}

async fn http_create_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<shared::protocol::JobSummary>), (StatusCode, Json<ApiError>)> {
    let job = create_job(&state.api, &req).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn http_update_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
    Json(req): Json<UpdateJobRequest>,
) -> Result<Json<shared::protocol::JobSummary>, (StatusCode, Json<ApiError>)> {
    let job = update_job(&state.api, JobId(job_id), &req)
        .await
        .map_err(reject)?;
    Ok(Json(job))
}

async fn http_reorder_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
    Json(req): Json<ReorderJobRequest>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    reorder_job(&state.api, JobId(job_id), &req)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_list_candidates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListCandidatesQuery>,
) -> Result<Json<shared::protocol::CandidatePage>, (StatusCode, Json<ApiError>)> {
    let page = list_candidates(&state.api, &query).await.map_err(reject)?;
    Ok(Json(page))
}

async fn http_create_candidate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCandidateRequest>,
) -> Result<(StatusCode, Json<shared::protocol::CandidateSummary>), (StatusCode, Json<ApiError>)> {
    let candidate = create_candidate(&state.api, &req).await.map_err(reject)?;
    Ok((StatusCode::CREATED, Json(candidate)))
}

async fn http_change_stage(
    State(state): State<Arc<AppState>>,
    Path(candidate_id): Path<i64>,
    Json(req): Json<ChangeStageRequest>,
) -> Result<Json<shared::protocol::CandidateSummary>, (StatusCode, Json<ApiError>)> {
    let candidate = change_candidate_stage(&state.api, CandidateId(candidate_id), &req)
        .await
        .map_err(reject)?;
    Ok(Json(candidate))
}

async fn http_candidate_timeline(
    State(state): State<Arc<AppState>>,
    Path(candidate_id): Path<i64>,
) -> Result<Json<Vec<shared::protocol::StageChangeEvent>>, (StatusCode, Json<ApiError>)> {
    let events = candidate_timeline(&state.api, CandidateId(candidate_id))
        .await
        .map_err(reject)?;
    Ok(Json(events))
}

async fn http_get_assessment(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
) -> Result<Json<shared::protocol::AssessmentDocument>, (StatusCode, Json<ApiError>)> {
    let doc = get_assessment(&state.api, JobId(job_id))
        .await
        .map_err(reject)?;
    Ok(Json(doc))
}

async fn http_put_assessment(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
    Json(req): Json<UpsertAssessmentRequest>,
) -> Result<Json<shared::protocol::AssessmentDocument>, (StatusCode, Json<ApiError>)> {
    let doc = upsert_assessment(&state.api, JobId(job_id), &req)
        .await
        .map_err(reject)?;
    Ok(Json(doc))
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
