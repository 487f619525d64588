use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::models::mode::ModeDescriptor;

/// GET /api/v1/modes
pub async fn list_modes(State(state): State<AppState>) -> Json<Vec<ModeDescriptor>> {
    Json(state.dispatcher.registry().descriptors())
}
