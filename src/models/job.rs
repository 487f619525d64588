use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::checkpoint::{Checkpoint, CheckpointStatus};
use super::mode::Mode;

/// Lifecycle state of an orchestration job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    AwaitingCheckpoint,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }

    /// Edges of the job state machine. Nothing re-enters `Queued`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, AwaitingCheckpoint)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
                | (AwaitingCheckpoint, Running)
                | (AwaitingCheckpoint, Succeeded)
                | (AwaitingCheckpoint, Failed)
                | (AwaitingCheckpoint, Cancelled)
        )
    }

    /// States in which the driver may still report progress or finish the job.
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Running | JobState::AwaitingCheckpoint)
    }
}

/// Progress of a job. `percent` never decreases; `step` counts reported turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Progress {
    pub percent: u8,
    pub step: u32,
    pub status: String,
}

/// A progress report from the driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProgressUpdate {
    /// `None` keeps the current percentage.
    pub percent: Option<u8>,
    pub status: String,
    /// Turn output relayed to subscribers; not kept on the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

/// Classification of a job failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
pub enum ErrorKind {
    EngineFailure,
    CheckpointTimeout,
    CheckpointRejected,
}

/// Structured failure recorded on a `failed` job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            kind.to_string()
        } else {
            message
        };
        Self {
            kind,
            message,
            retryable,
        }
    }
}

/// One orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub mode: Mode,
    pub state: JobState,
    pub progress: Progress,
    pub input: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<JobError>,
    pub checkpoints: Vec<Checkpoint>,
    /// Bumped on every mutation; used for compare-and-set progress updates.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(mode: Mode, input: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            mode,
            state: JobState::Queued,
            progress: Progress::default(),
            input,
            result: None,
            error: None,
            checkpoints: Vec::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn pending_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints
            .iter()
            .find(|c| c.status == CheckpointStatus::Pending)
    }

    pub fn checkpoint(&self, checkpoint_id: Uuid) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.id == checkpoint_id)
    }
}

/// Returned to callers of autonomous starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobHandle {
    pub id: Uuid,
    pub mode: Mode,
    pub state: JobState,
}

impl From<&Job> for JobHandle {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            mode: job.mode,
            state: job.state,
        }
    }
}

/// Selection for `JobStore::list`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub mode: Option<Mode>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.state.map_or(true, |s| s == job.state) && self.mode.map_or(true, |m| m == job.mode)
    }
}
