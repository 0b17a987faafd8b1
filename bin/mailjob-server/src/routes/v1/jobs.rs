//! Job lifecycle endpoints.
//!
//! Every route is scoped to the caller from `x-user-id`: a job owned by
//! someone else answers 403, a missing one 404.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use mailjob_core::{JobFilter, JobStatus, JobType, StatusFilter, StreamEvent};
use tracing::{info, warn};
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::middleware::CurrentUser;
use crate::schemas::v1::job::{
    CreateJobRequest, JobListResponse, JobResponse, JobResponseExt, JobStatsResponse,
    JobStatusResponse, ListJobsQuery,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(create_job, list_jobs, get_job, cancel_job, delete_job, stream_job),
    components(schemas(
        CreateJobRequest,
        JobStatusResponse,
        JobResponse,
        JobStatsResponse,
        JobListResponse,
        ListJobsQuery
    ))
)]
pub struct JobsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job).delete(delete_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/stream", get(stream_job))
}

#[utoipa::path(
    post,
    path = "/v1/jobs",
    tag = "jobs",
    request_body = CreateJobRequest,
    params(("x-user-id" = String, Header, description = "Caller's owner id")),
    responses(
        (status = 201, description = "Job created and queued", body = JobStatusResponse),
        (status = 400, description = "Unknown job type or invalid metadata"),
        (status = 401, description = "Missing caller identity"),
        (status = 503, description = "Job could not be scheduled"),
    )
)]
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobStatusResponse>), ServerError> {
    let job = state
        .jobs
        .submit(&req.job_type, req.metadata, Some(&user))
        .await?;
    info!(job_id = %job.id, job_type = %job.job_type, owner = %user, "job submitted");
    Ok((StatusCode::CREATED, Json(job.to_status_response())))
}

#[utoipa::path(
    get,
    path = "/v1/jobs",
    tag = "jobs",
    params(ListJobsQuery, ("x-user-id" = String, Header, description = "Caller's owner id")),
    responses(
        (status = 200, description = "Caller's jobs, newest first, or counts with stats=true", body = JobListResponse),
        (status = 400, description = "Bad filter"),
        (status = 401, description = "Missing caller identity"),
    )
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<JobListResponse>, ServerError> {
    if q.stats.unwrap_or(false) {
        let stats = state.jobs.job_stats(Some(&user)).await?;
        return Ok(Json(JobListResponse::Stats {
            stats: stats.into(),
        }));
    }

    let job_type = q
        .job_type
        .as_deref()
        .map(|t| {
            t.parse::<JobType>()
                .map_err(|_| ServerError::BadRequest(format!("invalid job type: {t}")))
        })
        .transpose()?;
    let status = q
        .status
        .as_deref()
        .map(|s| {
            JobStatus::parse_set(s)
                .map_err(|_| ServerError::BadRequest(format!("invalid status filter: {s}")))
        })
        .transpose()?
        .filter(|set| !set.is_empty())
        .map(StatusFilter);

    let filter = JobFilter {
        job_type,
        status,
        user_id: Some(user),
        limit: q.limit.unwrap_or(JobFilter::DEFAULT_LIMIT),
    };
    let jobs = state.jobs.list_jobs(filter).await?;
    Ok(Json(JobListResponse::Jobs {
        jobs: jobs.iter().map(|j| j.to_response()).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}",
    tag = "jobs",
    params(
        ("id" = String, Path, description = "Job id"),
        ("x-user-id" = String, Header, description = "Caller's owner id"),
    ),
    responses(
        (status = 200, description = "Full job record", body = JobResponse),
        (status = 403, description = "Job belongs to someone else"),
        (status = 404, description = "Job not found"),
    )
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, ServerError> {
    let job = state.jobs.get_job_for(&id, &user).await?;
    Ok(Json(job.to_response()))
}

#[utoipa::path(
    post,
    path = "/v1/jobs/{id}/cancel",
    tag = "jobs",
    params(
        ("id" = String, Path, description = "Job id"),
        ("x-user-id" = String, Header, description = "Caller's owner id"),
    ),
    responses(
        (status = 200, description = "Current status after the request; finished jobs are unchanged", body = JobStatusResponse),
        (status = 403, description = "Job belongs to someone else"),
        (status = 404, description = "Job not found"),
    )
)]
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, ServerError> {
    let job = state.jobs.cancel_job_for(&id, &user).await?;
    Ok(Json(job.to_status_response()))
}

#[utoipa::path(
    delete,
    path = "/v1/jobs/{id}",
    tag = "jobs",
    params(
        ("id" = String, Path, description = "Job id"),
        ("x-user-id" = String, Header, description = "Caller's owner id"),
    ),
    responses(
        (status = 204, description = "Job deleted"),
        (status = 400, description = "Job is still pending or running"),
        (status = 403, description = "Job belongs to someone else"),
        (status = 404, description = "Job not found"),
    )
)]
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    state.jobs.delete_job_for(&id, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}/stream",
    tag = "jobs",
    params(
        ("id" = String, Path, description = "Job id"),
        ("x-user-id" = String, Header, description = "Caller's owner id"),
    ),
    responses(
        (status = 200, description = "Server-sent events: connected, progress*, complete | error", content_type = "text/event-stream"),
        (status = 403, description = "Job belongs to someone else"),
        (status = 404, description = "Job not found"),
    )
)]
pub async fn stream_job(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    state.jobs.get_job_for(&id, &user).await?;

    let events = state.gateway.open(id).map(|ev| Ok(to_sse(&ev)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(ev: &StreamEvent) -> Event {
    Event::default()
        .event(ev.event_name())
        .json_data(ev)
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to encode stream event");
            Event::default()
                .event("error")
                .data(r#"{"type":"error","message":"failed to encode event"}"#)
        })
}

// ── Tests ──────────────────────────────────────────────────────────────────────
