use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Approved,
    Rejected,
    TimedOut,
    /// Closed because its job was cancelled.
    Cancelled,
}

impl CheckpointStatus {
    pub fn is_resolved(self) -> bool {
        self != CheckpointStatus::Pending
    }
}

/// A reviewer's verdict on a checkpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl From<Decision> for CheckpointStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approved => CheckpointStatus::Approved,
            Decision::Rejected => CheckpointStatus::Rejected,
        }
    }
}

/// A request for human input raised by the engine inside a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub id: Uuid,
    /// Owning job (back-reference only).
    pub job_id: Uuid,
    pub status: CheckpointStatus,
    pub payload: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(job_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            status: CheckpointStatus::Pending,
            payload,
            response: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

/// Outcome handed back to the engine when a checkpoint leaves `pending`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resolution {
    pub checkpoint_id: Uuid,
    pub status: CheckpointStatus,
    pub response: Option<serde_json::Value>,
}

impl From<&Checkpoint> for Resolution {
    fn from(checkpoint: &Checkpoint) -> Self {
        Self {
            checkpoint_id: checkpoint.id,
            status: checkpoint.status,
            response: checkpoint.response.clone(),
        }
    }
}
