use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::models::job::JobState;

/// Errors surfaced by the orchestration core to its callers.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("invalid mode '{mode_id}': {reason}")]
    InvalidMode { mode_id: String, reason: &'static str },

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("checkpoint {0} not found")]
    CheckpointNotFound(Uuid),

    #[error("invalid transition for job {job_id}: {detail}")]
    InvalidTransition { job_id: Uuid, detail: String },

    #[error("job {job_id} is already {state}")]
    AlreadyTerminal { job_id: Uuid, state: JobState },

    #[error("job {job_id} already has pending checkpoint {pending}")]
    CheckpointConflict { job_id: Uuid, pending: Uuid },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl OrchestrationError {
    pub fn invalid_transition(job_id: Uuid, detail: impl Into<String>) -> Self {
        Self::InvalidTransition {
            job_id,
            detail: detail.into(),
        }
    }

    /// Stable machine-readable name used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidMode { .. } => "InvalidMode",
            Self::NotFound(_) => "NotFound",
            Self::CheckpointNotFound(_) => "CheckpointNotFound",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::AlreadyTerminal { .. } => "AlreadyTerminal",
            Self::CheckpointConflict { .. } => "CheckpointConflict",
            Self::Validation(_) => "ValidationFailed",
            Self::Database(_) => "PersistenceFailure",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidMode { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) | Self::CheckpointNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. }
            | Self::AlreadyTerminal { .. }
            | Self::CheckpointConflict { .. } => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<garde::Report> for OrchestrationError {
    fn from(report: garde::Report) -> Self {
        Self::Validation(report.to_string())
    }
}

impl IntoResponse for OrchestrationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
