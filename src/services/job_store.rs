use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::models::checkpoint::{Checkpoint, CheckpointStatus};
use crate::models::event::{EventKind, JobEvent};
use crate::models::job::{Job, JobError, JobFilter, JobState, ProgressUpdate};
use crate::models::mode::Mode;
use crate::services::events::EventStream;

const DEFAULT_EVENT_BUFFER: usize = 256;

/// Change forwarded to the persistence mirror.
#[derive(Debug, Clone)]
pub enum MirrorOp {
    Upsert(Box<Job>),
    Delete(Uuid),
}

struct JobEntry {
    job: Job,
    log: Vec<JobEvent>,
    events: broadcast::Sender<JobEvent>,
}

impl JobEntry {
    /// Bump revision and timestamps, append events to the log and publish them.
    fn commit(&mut self, kinds: Vec<EventKind>, mirror: Option<&mpsc::UnboundedSender<MirrorOp>>) {
        let now = Utc::now();
        self.job.revision += 1;
        self.job.updated_at = now;
        for kind in kinds {
            let event = JobEvent {
                job_id: self.job.id,
                seq: self.log.len() as u64 + 1,
                at: now,
                kind,
            };
            self.log.push(event.clone());
            // No receivers is fine: late subscribers replay from the log.
            let _ = self.events.send(event);
        }
        if let Some(tx) = mirror {
            let _ = tx.send(MirrorOp::Upsert(Box::new(self.job.clone())));
        }
    }

    fn transition(
        &mut self,
        to: JobState,
        mirror: Option<&mpsc::UnboundedSender<MirrorOp>>,
    ) -> Result<(), OrchestrationError> {
        let from = self.job.state;
        if !from.can_transition_to(to) {
            return Err(OrchestrationError::invalid_transition(
                self.job.id,
                format!("{} -> {} is not allowed", from, to),
            ));
        }
        self.job.state = to;
        let kind = EventKind::StateChanged {
            from,
            to,
            result: self.job.result.clone(),
            error: self.job.error.clone(),
        };
        self.commit(vec![kind], mirror);
        Ok(())
    }
}

struct StoreInner {
    jobs: RwLock<HashMap<Uuid, Arc<Mutex<JobEntry>>>>,
    checkpoint_owners: RwLock<HashMap<Uuid, Uuid>>,
    mirror: Option<mpsc::UnboundedSender<MirrorOp>>,
    event_buffer: usize,
}

/// Single source of truth for job state.
///
/// Each job sits behind its own lock, so jobs never contend with each other.
/// Every mutation is a compare-and-set against the job's current state (or
/// revision, for progress) and appends to the job's transition log.
#[derive(Clone)]
pub struct JobStore {
    inner: Arc<StoreInner>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl JobStore {
    pub fn new(event_buffer: usize) -> Self {
        Self::build(event_buffer, None)
    }

    /// Store that forwards every change to a persistence mirror.
    pub fn with_mirror(event_buffer: usize, mirror: mpsc::UnboundedSender<MirrorOp>) -> Self {
        Self::build(event_buffer, Some(mirror))
    }

    fn build(event_buffer: usize, mirror: Option<mpsc::UnboundedSender<MirrorOp>>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                jobs: RwLock::new(HashMap::new()),
                checkpoint_owners: RwLock::new(HashMap::new()),
                mirror,
                event_buffer: event_buffer.max(1),
            }),
        }
    }

    fn entry(&self, id: Uuid) -> Result<Arc<Mutex<JobEntry>>, OrchestrationError> {
        self.inner
            .jobs
            .read()
            .get(&id)
            .cloned()
            .ok_or(OrchestrationError::NotFound(id))
    }

    fn mirror(&self) -> Option<&mpsc::UnboundedSender<MirrorOp>> {
        self.inner.mirror.as_ref()
    }

    /// Allocate a fresh job in `queued`.
    pub fn create(&self, mode: Mode, input: serde_json::Value) -> Job {
        let job = Job::new(mode, input);
        let (events, _) = broadcast::channel(self.inner.event_buffer);
        let entry = JobEntry {
            job: job.clone(),
            log: Vec::new(),
            events,
        };
        self.inner
            .jobs
            .write()
            .insert(job.id, Arc::new(Mutex::new(entry)));
        if let Some(tx) = self.mirror() {
            let _ = tx.send(MirrorOp::Upsert(Box::new(job.clone())));
        }
        tracing::debug!(job_id = %job.id, mode = %mode, "Job created");
        job
    }

    pub fn get(&self, id: Uuid) -> Result<Job, OrchestrationError> {
        Ok(self.entry(id)?.lock().job.clone())
    }

    /// Snapshots matching `filter`, newest first.
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let entries: Vec<_> = self.inner.jobs.read().values().cloned().collect();
        let mut jobs: Vec<Job> = entries
            .iter()
            .map(|e| e.lock().job.clone())
            .filter(|job| filter.matches(job))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        jobs
    }

    /// `queued -> running`.
    pub fn start(&self, id: Uuid) -> Result<Job, OrchestrationError> {
        let entry = self.entry(id)?;
        let mut entry = entry.lock();
        if entry.job.state != JobState::Queued {
            return Err(OrchestrationError::invalid_transition(
                id,
                format!("cannot start a job that is {}", entry.job.state),
            ));
        }
        entry.transition(JobState::Running, self.mirror())?;
        Ok(entry.job.clone())
    }

    /// Record progress if the job is still at `expected_revision`.
    ///
    /// The loser of two writers racing on the same revision gets
    /// `InvalidTransition` and the job is left untouched.
    pub fn update_progress(
        &self,
        id: Uuid,
        expected_revision: u64,
        update: ProgressUpdate,
    ) -> Result<Job, OrchestrationError> {
        let entry = self.entry(id)?;
        let mut entry = entry.lock();
        if !entry.job.state.is_active() {
            return Err(OrchestrationError::invalid_transition(
                id,
                format!("cannot report progress while {}", entry.job.state),
            ));
        }
        if entry.job.revision != expected_revision {
            return Err(OrchestrationError::invalid_transition(
                id,
                format!(
                    "stale revision {} (current {})",
                    expected_revision, entry.job.revision
                ),
            ));
        }

        let progress = &mut entry.job.progress;
        if let Some(percent) = update.percent {
            progress.percent = progress.percent.max(percent.min(100));
        }
        progress.step += 1;
        progress.status = update.status;
        let kind = EventKind::Progress {
            progress: progress.clone(),
            output: update.output,
        };
        entry.commit(vec![kind], self.mirror());
        Ok(entry.job.clone())
    }

    /// `running|awaiting_checkpoint -> succeeded`. Repeating with the same result is a no-op.
    pub fn complete(&self, id: Uuid, result: serde_json::Value) -> Result<Job, OrchestrationError> {
        let entry = self.entry(id)?;
        let mut entry = entry.lock();
        let state = entry.job.state;
        if state == JobState::Succeeded && entry.job.result.as_ref() == Some(&result) {
            return Ok(entry.job.clone());
        }
        if state.is_terminal() {
            return Err(OrchestrationError::AlreadyTerminal { job_id: id, state });
        }
        if !state.is_active() {
            return Err(OrchestrationError::invalid_transition(
                id,
                format!("cannot complete a job that is {}", state),
            ));
        }
        entry.job.result = Some(result);
        entry.job.progress.percent = 100;
        entry.transition(JobState::Succeeded, self.mirror())?;
        Ok(entry.job.clone())
    }

    /// `running|awaiting_checkpoint -> failed`. Repeating with the same error is a no-op.
    pub fn fail(&self, id: Uuid, error: JobError) -> Result<Job, OrchestrationError> {
        let entry = self.entry(id)?;
        let mut entry = entry.lock();
        let state = entry.job.state;
        if state == JobState::Failed && entry.job.error.as_ref() == Some(&error) {
            return Ok(entry.job.clone());
        }
        if state.is_terminal() {
            return Err(OrchestrationError::AlreadyTerminal { job_id: id, state });
        }
        if !state.is_active() {
            return Err(OrchestrationError::invalid_transition(
                id,
                format!("cannot fail a job that is {}", state),
            ));
        }
        entry.job.error = Some(error);
        entry.transition(JobState::Failed, self.mirror())?;
        Ok(entry.job.clone())
    }

    /// Any non-terminal state `-> cancelled`. Cancelled jobs carry no error.
    ///
    /// A pending checkpoint is closed as `cancelled` in the same critical
    /// section, and its `checkpoint_resolved` event precedes the terminal one.
    pub fn cancel(&self, id: Uuid) -> Result<Job, OrchestrationError> {
        let entry = self.entry(id)?;
        let mut entry = entry.lock();
        let from = entry.job.state;
        if from.is_terminal() {
            return Err(OrchestrationError::AlreadyTerminal { job_id: id, state: from });
        }

        let mut kinds = Vec::with_capacity(2);
        if let Some(checkpoint) = entry
            .job
            .checkpoints
            .iter_mut()
            .find(|c| c.status == CheckpointStatus::Pending)
        {
            checkpoint.status = CheckpointStatus::Cancelled;
            checkpoint.resolved_at = Some(Utc::now());
            kinds.push(EventKind::CheckpointResolved(checkpoint.clone()));
        }
        entry.job.state = JobState::Cancelled;
        kinds.push(EventKind::StateChanged {
            from,
            to: JobState::Cancelled,
            result: None,
            error: None,
        });
        entry.commit(kinds, self.mirror());
        Ok(entry.job.clone())
    }

    /// Attach a pending checkpoint and move `running -> awaiting_checkpoint`.
    pub fn suspend(
        &self,
        id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(Job, Checkpoint), OrchestrationError> {
        let entry = self.entry(id)?;
        let mut entry = entry.lock();
        if let Some(pending) = entry.job.pending_checkpoint() {
            return Err(OrchestrationError::CheckpointConflict {
                job_id: id,
                pending: pending.id,
            });
        }
        let from = entry.job.state;
        if from != JobState::Running {
            return Err(OrchestrationError::invalid_transition(
                id,
                format!("checkpoints can only be opened while running, job is {}", from),
            ));
        }

        let checkpoint = Checkpoint::new(id, payload);
        entry.job.checkpoints.push(checkpoint.clone());
        entry.job.state = JobState::AwaitingCheckpoint;
        let kinds = vec![
            EventKind::StateChanged {
                from,
                to: JobState::AwaitingCheckpoint,
                result: None,
                error: None,
            },
            EventKind::CheckpointCreated(checkpoint.clone()),
        ];
        entry.commit(kinds, self.mirror());
        self.inner
            .checkpoint_owners
            .write()
            .insert(checkpoint.id, id);
        Ok((entry.job.clone(), checkpoint))
    }

    /// Move a pending checkpoint to `status` and, when `resume` is set, the job
    /// `awaiting_checkpoint -> running`, both in one critical section.
    pub fn resolve_checkpoint(
        &self,
        job_id: Uuid,
        checkpoint_id: Uuid,
        status: CheckpointStatus,
        response: Option<serde_json::Value>,
        resume: bool,
    ) -> Result<(Job, Checkpoint), OrchestrationError> {
        if status == CheckpointStatus::Pending {
            return Err(OrchestrationError::invalid_transition(
                job_id,
                "a checkpoint cannot be resolved to pending",
            ));
        }
        let entry = self.entry(job_id)?;
        let mut entry = entry.lock();
        let state = entry.job.state;
        let index = entry
            .job
            .checkpoints
            .iter()
            .position(|c| c.id == checkpoint_id)
            .ok_or(OrchestrationError::CheckpointNotFound(checkpoint_id))?;
        let current = entry.job.checkpoints[index].status;
        if current.is_resolved() {
            return Err(OrchestrationError::invalid_transition(
                job_id,
                format!("checkpoint {} is already {}", checkpoint_id, current),
            ));
        }
        if state != JobState::AwaitingCheckpoint {
            return Err(OrchestrationError::invalid_transition(
                job_id,
                format!("cannot resolve a checkpoint while job is {}", state),
            ));
        }

        let checkpoint = &mut entry.job.checkpoints[index];
        checkpoint.status = status;
        checkpoint.response = response;
        checkpoint.resolved_at = Some(Utc::now());
        let checkpoint = checkpoint.clone();

        let mut kinds = vec![EventKind::CheckpointResolved(checkpoint.clone())];
        if resume {
            entry.job.state = JobState::Running;
            kinds.push(EventKind::StateChanged {
                from: state,
                to: JobState::Running,
                result: None,
                error: None,
            });
        }
        entry.commit(kinds, self.mirror());
        Ok((entry.job.clone(), checkpoint))
    }

    /// Job owning `checkpoint_id`.
    pub fn checkpoint_owner(&self, checkpoint_id: Uuid) -> Result<Uuid, OrchestrationError> {
        self.inner
            .checkpoint_owners
            .read()
            .get(&checkpoint_id)
            .copied()
            .ok_or(OrchestrationError::CheckpointNotFound(checkpoint_id))
    }

    /// Log entries with `seq > after`.
    pub fn events_since(&self, id: Uuid, after: u64) -> Result<Vec<JobEvent>, OrchestrationError> {
        let entry = self.entry(id)?;
        let entry = entry.lock();
        Ok(entry.log.iter().skip(after as usize).cloned().collect())
    }

    /// Open an event stream replaying everything after `after_seq`, then live events.
    ///
    /// `after_seq` past the end of the log is clamped to it. A stream on a
    /// terminal job ends once its backlog is drained.
    pub fn subscribe(&self, id: Uuid, after_seq: Option<u64>) -> Result<EventStream, OrchestrationError> {
        let entry = self.entry(id)?;
        let entry = entry.lock();
        let after = after_seq.unwrap_or(0).min(entry.log.len() as u64);
        let backlog = entry.log.iter().skip(after as usize).cloned().collect();
        let live = entry.events.subscribe();
        let terminal = entry.job.state.is_terminal();
        Ok(EventStream::new(self.clone(), id, after, backlog, live, terminal))
    }

    /// Remove a terminal job and its checkpoints.
    pub fn purge(&self, id: Uuid) -> Result<Job, OrchestrationError> {
        let mut jobs = self.inner.jobs.write();
        let entry = jobs.get(&id).cloned().ok_or(OrchestrationError::NotFound(id))?;
        let job = entry.lock().job.clone();
        if !job.state.is_terminal() {
            return Err(OrchestrationError::invalid_transition(
                id,
                format!("cannot purge a job that is {}", job.state),
            ));
        }
        jobs.remove(&id);
        drop(jobs);

        let mut owners = self.inner.checkpoint_owners.write();
        for checkpoint in &job.checkpoints {
            owners.remove(&checkpoint.id);
        }
        if let Some(tx) = self.mirror() {
            let _ = tx.send(MirrorOp::Delete(id));
        }
        Ok(job)
    }

    /// Purge terminal jobs last updated before `cutoff`. Returns how many were removed.
    pub fn purge_expired(&self, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<Uuid> = self
            .list(&JobFilter::default())
            .into_iter()
            .filter(|job| job.state.is_terminal() && job.updated_at < cutoff)
            .map(|job| job.id)
            .collect();
        expired
            .into_iter()
            .filter(|id| self.purge(*id).is_ok())
            .count()
    }
}
