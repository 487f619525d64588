use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::models::checkpoint::{Checkpoint, CheckpointStatus, Decision, Resolution};
use crate::models::mode::{ModePolicy, TimeoutAction};
use crate::services::job_store::JobStore;

/// A checkpoint the driver is waiting on.
pub struct PendingCheckpoint {
    pub checkpoint: Checkpoint,
    policy: ModePolicy,
    deadline: Option<Instant>,
    signal: oneshot::Receiver<Resolution>,
}

/// How a wait on a checkpoint ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointOutcome {
    Resolved(Resolution),
    /// Deadline passed. `resumed` is true when the policy auto-continued the job.
    TimedOut { resolution: Resolution, resumed: bool },
    /// The job was cancelled or removed while waiting.
    Abandoned,
}

/// Owns checkpoint resolution: the only writer of checkpoint status and response.
///
/// Job state changes go through the store; resolving a checkpoint moves its job
/// back to `running` in the same store operation and then wakes the driver.
#[derive(Clone)]
pub struct CheckpointManager {
    store: JobStore,
    waiters: Arc<Mutex<HashMap<Uuid, oneshot::Sender<Resolution>>>>,
}

impl CheckpointManager {
    pub fn new(store: JobStore) -> Self {
        Self {
            store,
            waiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Raise a checkpoint on a running job, suspending it.
    pub fn open(
        &self,
        job_id: Uuid,
        payload: serde_json::Value,
        policy: ModePolicy,
    ) -> Result<PendingCheckpoint, OrchestrationError> {
        let (_, checkpoint) = self.store.suspend(job_id, payload)?;
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(checkpoint.id, tx);

        metrics::counter!("orchestration_checkpoints_opened_total").increment(1);
        tracing::info!(
            job_id = %job_id,
            checkpoint_id = %checkpoint.id,
            timeout_secs = policy.checkpoint_timeout.map(|d| d.as_secs()),
            "Checkpoint awaiting review"
        );

        Ok(PendingCheckpoint {
            deadline: policy.checkpoint_timeout.map(|d| Instant::now() + d),
            checkpoint,
            policy,
            signal: rx,
        })
    }

    pub fn approve(
        &self,
        checkpoint_id: Uuid,
        response: Option<serde_json::Value>,
    ) -> Result<Checkpoint, OrchestrationError> {
        self.resolve(checkpoint_id, Decision::Approved, response)
    }

    pub fn reject(
        &self,
        checkpoint_id: Uuid,
        response: Option<serde_json::Value>,
    ) -> Result<Checkpoint, OrchestrationError> {
        self.resolve(checkpoint_id, Decision::Rejected, response)
    }

    /// Record a reviewer decision, resume the job and wake its driver.
    pub fn resolve(
        &self,
        checkpoint_id: Uuid,
        decision: Decision,
        response: Option<serde_json::Value>,
    ) -> Result<Checkpoint, OrchestrationError> {
        let job_id = self.store.checkpoint_owner(checkpoint_id)?;
        let (_, checkpoint) =
            self.store
                .resolve_checkpoint(job_id, checkpoint_id, decision.into(), response, true)?;

        tracing::info!(
            job_id = %job_id,
            checkpoint_id = %checkpoint_id,
            status = %checkpoint.status,
            "Checkpoint resolved"
        );
        self.signal(&checkpoint);
        Ok(checkpoint)
    }

    /// Mark a still-pending checkpoint `timed_out`. Resumes the job only when the
    /// mode auto-continues; otherwise the job stays suspended for the driver to fail.
    fn expire(&self, pending: &PendingCheckpoint) -> Result<Checkpoint, OrchestrationError> {
        let resume = pending.policy.on_timeout == TimeoutAction::AutoContinue;
        let (_, checkpoint) = self.store.resolve_checkpoint(
            pending.checkpoint.job_id,
            pending.checkpoint.id,
            CheckpointStatus::TimedOut,
            None,
            resume,
        )?;
        self.waiters.lock().remove(&checkpoint.id);

        metrics::counter!("orchestration_checkpoint_timeouts_total").increment(1);
        tracing::warn!(
            job_id = %checkpoint.job_id,
            checkpoint_id = %checkpoint.id,
            auto_continue = resume,
            "Checkpoint timed out"
        );
        Ok(checkpoint)
    }

    fn signal(&self, checkpoint: &Checkpoint) {
        if let Some(tx) = self.waiters.lock().remove(&checkpoint.id) {
            let _ = tx.send(Resolution::from(checkpoint));
        }
    }

    /// Drop the waiter for a job's pending checkpoint, if any.
    pub fn forget(&self, job_id: Uuid) {
        self.waiters
            .lock()
            .retain(|checkpoint_id, _| self.store.checkpoint_owner(*checkpoint_id).ok() != Some(job_id));
    }

    /// Wait until the checkpoint is resolved, its deadline passes, or `cancel` fires.
    pub async fn wait(
        &self,
        mut pending: PendingCheckpoint,
        cancel: &CancellationToken,
    ) -> CheckpointOutcome {
        let deadline = pending.deadline;
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                self.waiters.lock().remove(&pending.checkpoint.id);
                CheckpointOutcome::Abandoned
            }
            signal = &mut pending.signal => match signal {
                Ok(resolution) => CheckpointOutcome::Resolved(resolution),
                Err(_) => CheckpointOutcome::Abandoned,
            },
            _ = timer => match self.expire(&pending) {
                Ok(checkpoint) => CheckpointOutcome::TimedOut {
                    resolution: Resolution::from(&checkpoint),
                    resumed: pending.policy.on_timeout == TimeoutAction::AutoContinue,
                },
                // A reviewer got there first; their decision is already on the way.
                Err(_) => match pending.signal.await {
                    Ok(resolution) => CheckpointOutcome::Resolved(resolution),
                    Err(_) => CheckpointOutcome::Abandoned,
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{Job, JobState};
    use crate::models::mode::{Mode, RejectAction};
    use serde_json::json;
    use std::time::Duration;

    fn policy(timeout_ms: Option<u64>, on_timeout: TimeoutAction) -> ModePolicy {
        ModePolicy {
            checkpoint_timeout: timeout_ms.map(Duration::from_millis),
            on_timeout,
            on_reject: RejectAction::FailJob,
        }
    }

    fn running_job(store: &JobStore) -> Job {
        let job = store.create(Mode::ManualAutonomous, json!(null));
        store.start(job.id).unwrap()
    }

    #[tokio::test]
    async fn test_approve_resumes_job_and_wakes_driver() {
        let store = JobStore::default();
        let manager = CheckpointManager::new(store.clone());
        let job = running_job(&store);
        let pending = manager
            .open(job.id, json!({"plan": "x"}), policy(None, TimeoutAction::FailJob))
            .unwrap();
        let checkpoint_id = pending.checkpoint.id;
        assert_eq!(store.get(job.id).unwrap().state, JobState::AwaitingCheckpoint);

        let resolved = manager.approve(checkpoint_id, Some(json!("lgtm"))).unwrap();
        assert_eq!(resolved.status, CheckpointStatus::Approved);
        assert_eq!(store.get(job.id).unwrap().state, JobState::Running);

        let outcome = manager.wait(pending, &CancellationToken::new()).await;
        match outcome {
            CheckpointOutcome::Resolved(resolution) => {
                assert_eq!(resolution.status, CheckpointStatus::Approved);
                assert_eq!(resolution.response, Some(json!("lgtm")));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reject_resumes_job() {
        let store = JobStore::default();
        let manager = CheckpointManager::new(store.clone());
        let job = running_job(&store);
        let pending = manager
            .open(job.id, json!({}), policy(None, TimeoutAction::FailJob))
            .unwrap();
        manager.reject(pending.checkpoint.id, None).unwrap();
        assert_eq!(store.get(job.id).unwrap().state, JobState::Running);
        assert!(matches!(
            manager.approve(pending.checkpoint.id, None),
            Err(OrchestrationError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_checkpoint() {
        let manager = CheckpointManager::new(JobStore::default());
        assert!(matches!(
            manager.approve(Uuid::new_v4(), None),
            Err(OrchestrationError::CheckpointNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_leaves_job_suspended_for_failure() {
        let store = JobStore::default();
        let manager = CheckpointManager::new(store.clone());
        let job = running_job(&store);
        let pending = manager
            .open(job.id, json!({}), policy(Some(20), TimeoutAction::FailJob))
            .unwrap();
        let checkpoint_id = pending.checkpoint.id;

        let outcome = manager.wait(pending, &CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            CheckpointOutcome::TimedOut { resumed: false, .. }
        ));
        let job = store.get(job.id).unwrap();
        assert_eq!(job.state, JobState::AwaitingCheckpoint);
        assert_eq!(
            job.checkpoint(checkpoint_id).unwrap().status,
            CheckpointStatus::TimedOut
        );
        assert!(manager.approve(checkpoint_id, None).is_err());
    }

    #[tokio::test]
    async fn test_timeout_auto_continue_resumes_job() {
        let store = JobStore::default();
        let manager = CheckpointManager::new(store.clone());
        let job = running_job(&store);
        let pending = manager
            .open(job.id, json!({}), policy(Some(20), TimeoutAction::AutoContinue))
            .unwrap();

        let outcome = manager.wait(pending, &CancellationToken::new()).await;
        match outcome {
            CheckpointOutcome::TimedOut { resolution, resumed } => {
                assert!(resumed);
                assert_eq!(resolution.status, CheckpointStatus::TimedOut);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(store.get(job.id).unwrap().state, JobState::Running);
    }

    #[tokio::test]
    async fn test_cancel_abandons_wait() {
        let store = JobStore::default();
        let manager = CheckpointManager::new(store.clone());
        let job = running_job(&store);
        let pending = manager
            .open(job.id, json!({}), policy(None, TimeoutAction::FailJob))
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(manager.wait(pending, &token).await, CheckpointOutcome::Abandoned);
    }

    #[tokio::test]
    async fn test_forget_drops_only_that_jobs_waiter() {
        let store = JobStore::default();
        let manager = CheckpointManager::new(store.clone());
        let a = running_job(&store);
        let b = running_job(&store);
        let pending_a = manager
            .open(a.id, json!({}), policy(None, TimeoutAction::FailJob))
            .unwrap();
        let _pending_b = manager
            .open(b.id, json!({}), policy(None, TimeoutAction::FailJob))
            .unwrap();

        manager.forget(a.id);
        assert_eq!(manager.waiters.lock().len(), 1);
        assert_eq!(
            manager.wait(pending_a, &CancellationToken::new()).await,
            CheckpointOutcome::Abandoned
        );
    }
}
