use axum::extract::{Path, State};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::OrchestrationError;
use crate::models::api::ResolveCheckpointRequest;
use crate::models::checkpoint::Checkpoint;

/// POST /api/v1/checkpoints/{checkpoint_id}: submit a reviewer decision.
pub async fn resolve_checkpoint(
    State(state): State<AppState>,
    Path(checkpoint_id): Path<Uuid>,
    Json(request): Json<ResolveCheckpointRequest>,
) -> Result<Json<Checkpoint>, OrchestrationError> {
    request.validate()?;

    let checkpoint = state.dispatcher.checkpoints().resolve(
        checkpoint_id,
        request.decision,
        request.response,
    )?;
    Ok(Json(checkpoint))
}
