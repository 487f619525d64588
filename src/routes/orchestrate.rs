use axum::extract::State;
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::error::OrchestrationError;
use crate::models::api::{StartRequest, StartResponse};
use crate::services::dispatcher::Started;
use crate::services::mode_mapper::resolve_simplified_mode;

pub const JOB_ID_HEADER: HeaderName = HeaderName::from_static("x-job-id");

/// POST /api/v1/orchestrate: start a run in the requested mode.
///
/// Autonomous modes answer 202 with the job handle. Interactive modes answer
/// with the job's event stream; closing it cancels the job.
pub async fn start_orchestration(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Response, OrchestrationError> {
    request.validate()?;
    let mode_id = requested_mode(&request)?.to_owned();

    match state.dispatcher.start(&mode_id, request.input)? {
        Started::Queued(handle) => {
            tracing::info!(job_id = %handle.id, mode = %handle.mode, "Autonomous job queued");
            let body = StartResponse {
                job_id: handle.id,
                mode: handle.mode,
                state: handle.state,
            };
            Ok((StatusCode::ACCEPTED, Json(body)).into_response())
        }
        Started::Streaming(handle, events) => {
            tracing::info!(job_id = %handle.id, mode = %handle.mode, "Interactive job streaming");
            Ok((
                [(JOB_ID_HEADER, handle.id.to_string())],
                super::sse(events),
            )
                .into_response())
        }
    }
}

fn requested_mode(request: &StartRequest) -> Result<&str, OrchestrationError> {
    match (
        request.mode_id.as_deref(),
        request.auto_select_expert,
        request.autonomous_execution,
    ) {
        (Some(mode_id), _, _) => Ok(mode_id),
        (None, Some(auto), Some(autonomous)) => Ok(resolve_simplified_mode(auto, autonomous).id()),
        _ => Err(OrchestrationError::Validation(
            "mode_id or both auto_select_expert and autonomous_execution are required".to_string(),
        )),
    }
}
