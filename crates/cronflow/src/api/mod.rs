//! Manager REST surface: job CRUD, execution audit, health probes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::error::Error;
use crate::model::{Job, JobCreate, JobExecution, JobUpdate};
use crate::runner::RunnerMetrics;
use crate::service::JobService;

pub mod models;

use models::{ErrorBody, ListExecutionsQuery, ListJobsQuery};

#[derive(Clone)]
pub struct ApiState {
    pub service: JobService,
    pub pool: PgPool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route(
            "/jobs/:id",
            get(get_job).patch(update_job).delete(delete_job),
        )
        .route("/jobs/:id/executions", get(list_executions))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn error_response(e: Error) -> ApiError {
    let status = if e.is_validation() {
        StatusCode::BAD_REQUEST
    } else if matches!(e, Error::JobNotFound(_)) {
        StatusCode::NOT_FOUND
    } else {
        error!(error = %e, "request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (
        status,
        Json(ErrorBody {
            error: e.to_string(),
        }),
    )
}

async fn create_job(
    State(state): State<ApiState>,
    Json(body): Json<JobCreate>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job = state
        .service
        .create_job(body)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(job)))
}

async fn list_jobs(
    State(state): State<ApiState>,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let jobs = state
        .service
        .list_jobs(q.limit.unwrap_or(100), q.offset.unwrap_or(0), &q.tags())
        .await
        .map_err(error_response)?;

    Ok(Json(jobs))
}

async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    let job = state.service.get_job(id).await.map_err(error_response)?;
    Ok(Json(job))
}

async fn update_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(body): Json<JobUpdate>,
) -> Result<Json<Job>, ApiError> {
    let job = state
        .service
        .update_job(id, body)
        .await
        .map_err(error_response)?;

    Ok(Json(job))
}

async fn delete_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_job(id).await.map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_executions(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Query(q): Query<ListExecutionsQuery>,
) -> Result<Json<Vec<JobExecution>>, ApiError> {
    let executions = state
        .service
        .list_executions(
            id,
            q.only_failed.unwrap_or(false),
            q.limit.unwrap_or(100),
            q.offset.unwrap_or(0),
        )
        .await
        .map_err(error_response)?;

    Ok(Json(executions))
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<ApiState>) -> impl IntoResponse {
    match sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
    {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(e) => {
            error!(error = %e, "readiness probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unreachable")
        }
    }
}

// ----------------------------
// Runner ops surface
// ----------------------------

#[derive(Clone)]
pub struct RunnerOpsState {
    pub metrics: Arc<RunnerMetrics>,
    pub instance_id: String,
}

/// Minimal listener for the runner process: liveness + Prometheus text.
pub fn runner_router(state: RunnerOpsState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics/prom", get(metrics_prom))
        .with_state(state)
}

async fn metrics_prom(State(state): State<RunnerOpsState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        state.metrics.render_prometheus(&state.instance_id),
    )
}
