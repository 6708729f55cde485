use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use common::{
    CreateAutoPilotMonitorRequest, CreateAutoPilotMonitorResponse, JobResponse, OwnerId,
    OWNER_HEADER,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", get(list_jobs))
        .route("/api/v1/jobs/active", get(list_active_jobs))
        .route("/api/v1/jobs/autopilot-monitor", post(create_autopilot_monitor))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/cancel", post(cancel_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- helpers ---------------- */

fn owner_from(headers: &HeaderMap) -> Result<OwnerId, ApiError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingOwner(OWNER_HEADER))
}

// token de AutoML propio del llamador, opcional
fn bearer_from(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn responses(jobs: Vec<common::JobRecord>) -> Json<Vec<JobResponse>> {
    Json(jobs.into_iter().map(JobResponse::from).collect())
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Jobs del dueño, más nuevos primero
async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<JobResponse>>, ApiError> {
    let owner = owner_from(&headers)?;
    Ok(responses(state.supervisor.list_by_owner(&owner)))
}

async fn list_active_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<JobResponse>>, ApiError> {
    let owner = owner_from(&headers)?;
    Ok(responses(state.supervisor.list_active_for(Some(&owner))))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JobResponse>, ApiError> {
    let owner = owner_from(&headers)?;
    let job = state.supervisor.get_owned(&id, &owner)?;
    Ok(Json(job.into()))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JobResponse>, ApiError> {
    let owner = owner_from(&headers)?;
    let job = state.supervisor.cancel_owned(&id, &owner)?;
    info!("cancelación de job {} pedida por {}", id, owner);
    Ok(Json(job.into()))
}

async fn create_autopilot_monitor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateAutoPilotMonitorRequest>,
) -> Result<(StatusCode, Json<CreateAutoPilotMonitorResponse>), ApiError> {
    let owner = owner_from(&headers)?;

    let project_id = req.project_id.trim();
    if project_id.is_empty() {
        return Err(ApiError::BadRequest("project_id vacío".to_string()));
    }

    let config = state
        .config
        .monitor_config(bearer_from(&headers))
        .ok_or(ApiError::MissingApiToken)?;

    let job_id =
        monitor::submit_autopilot_monitor(&state.supervisor, config, &owner, project_id, vec![])?;

    Ok((
        StatusCode::CREATED,
        Json(CreateAutoPilotMonitorResponse {
            job_id,
            message: format!("monitoreo de AutoPilot iniciado para el proyecto {project_id}"),
        }),
    ))
}
