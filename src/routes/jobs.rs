use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::error::OrchestrationError;
use crate::models::api::{JobStatusResponse, ListJobsQuery};
use crate::models::job::JobFilter;

const DEFAULT_LIST_LIMIT: usize = 50;

/// GET /api/v1/jobs: newest jobs first, optionally filtered.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobStatusResponse>>, OrchestrationError> {
    query.validate()?;

    let filter = JobFilter {
        state: query.state,
        mode: query.mode,
        limit: Some(query.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
    };
    let jobs = state.dispatcher.store().list(&filter);
    Ok(Json(jobs.into_iter().map(JobStatusResponse::from).collect()))
}

/// GET /api/v1/jobs/{job_id}: job status, falling back to Postgres for
/// jobs that have left memory.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, OrchestrationError> {
    match state.dispatcher.store().get(job_id) {
        Ok(job) => Ok(Json(job.into())),
        Err(OrchestrationError::NotFound(_)) => {
            let Some(pool) = &state.db else {
                return Err(OrchestrationError::NotFound(job_id));
            };
            let job = queries::get_job(pool, job_id)
                .await?
                .ok_or(OrchestrationError::NotFound(job_id))?;
            Ok(Json(job.into()))
        }
        Err(e) => Err(e),
    }
}

/// GET /api/v1/jobs/{job_id}/events: SSE stream of the job's transitions.
///
/// Honours `Last-Event-ID` to resume after an already-seen sequence number.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, OrchestrationError> {
    let after_seq = last_event_id(&headers);
    let events = state.dispatcher.store().subscribe(job_id, after_seq)?;
    tracing::debug!(job_id = %job_id, after_seq, "Event subscriber attached");
    Ok(super::sse(events))
}

/// POST /api/v1/jobs/{job_id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, OrchestrationError> {
    let job = state.dispatcher.cancel(job_id)?;
    Ok(Json(job.into()))
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}
