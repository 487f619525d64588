use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::checkpoint::{Checkpoint, Decision};
use super::job::{Job, JobError, JobState, Progress};
use super::mode::Mode;

/// Request to start an orchestration run.
///
/// The mode is named by `mode_id`, or picked from the two UI toggles when
/// `mode_id` is absent.
#[derive(Debug, Deserialize, Validate)]
pub struct StartRequest {
    #[garde(length(min = 1, max = 64))]
    #[serde(default)]
    pub mode_id: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub auto_select_expert: Option<bool>,

    #[garde(skip)]
    #[serde(default)]
    pub autonomous_execution: Option<bool>,

    #[garde(skip)]
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Response after starting an autonomous run.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub job_id: Uuid,
    pub mode: Mode,
    pub state: JobState,
}

/// Reviewer verdict submitted for a checkpoint.
#[derive(Debug, Deserialize, Validate)]
pub struct ResolveCheckpointRequest {
    #[garde(skip)]
    pub decision: Decision,

    #[garde(skip)]
    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

/// Response for querying job status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub id: Uuid,
    pub mode: Mode,
    pub state: JobState,
    pub progress: Progress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub checkpoints: Vec<Checkpoint>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            mode: job.mode,
            state: job.state,
            progress: job.progress,
            result: job.result,
            error: job.error,
            checkpoints: job.checkpoints,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ListJobsQuery {
    #[garde(skip)]
    pub state: Option<JobState>,

    #[garde(skip)]
    pub mode: Option<Mode>,

    #[garde(range(min = 1, max = 500))]
    pub limit: Option<usize>,
}
