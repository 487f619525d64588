use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::checkpoint::Checkpoint;
use super::job::{JobError, JobState, Progress};

/// What changed. Serialized as `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    StateChanged {
        from: JobState,
        to: JobState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<JobError>,
    },
    Progress {
        #[serde(flatten)]
        progress: Progress,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
    },
    CheckpointCreated(Checkpoint),
    CheckpointResolved(Checkpoint),
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::StateChanged { .. } => "state_changed",
            EventKind::Progress { .. } => "progress",
            EventKind::CheckpointCreated(_) => "checkpoint_created",
            EventKind::CheckpointResolved(_) => "checkpoint_resolved",
        }
    }
}

/// One entry of a job's transition log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEvent {
    pub job_id: Uuid,
    /// Strictly increasing per job, starting at 1.
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl JobEvent {
    /// True for the `state_changed` event that ends the job.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::StateChanged { to, .. } if to.is_terminal())
    }
}
