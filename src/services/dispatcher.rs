use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::models::checkpoint::CheckpointStatus;
use crate::models::job::{ErrorKind, Job, JobError, JobHandle, ProgressUpdate};
use crate::models::mode::{Mode, ModePolicy, RejectAction};
use crate::services::checkpoint::{CheckpointManager, CheckpointOutcome};
use crate::services::engine::{EngineError, EngineSession, EngineStep, ExecutionEngine};
use crate::services::events::EventStream;
use crate::services::job_store::JobStore;
use crate::services::mode_mapper::ModeRegistry;
use crate::services::queue::{JobQueue, QueuedJob};

/// Result of starting a run.
pub enum Started {
    /// Autonomous: the job is queued; poll or subscribe for progress.
    Queued(JobHandle),
    /// Interactive: the job is already running and streams its turns.
    Streaming(JobHandle, EventStream),
}

/// Why the driver stopped pulling steps.
enum Halt {
    /// The engine finished the run.
    Finished,
    /// Cancelled, failed by policy, or no longer ours to mutate.
    Stopped,
    /// An engine call failed for good.
    Engine(EngineError),
}

struct DispatcherInner {
    registry: ModeRegistry,
    store: JobStore,
    checkpoints: CheckpointManager,
    engine: Arc<dyn ExecutionEngine>,
    queue: Arc<JobQueue>,
    active: Mutex<HashMap<Uuid, CancellationToken>>,
}

/// Error boundary between the execution engine and the job state machine.
///
/// Validates the mode, creates jobs, drives engine sessions, and turns every
/// engine failure into a structured job failure.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        registry: ModeRegistry,
        store: JobStore,
        checkpoints: CheckpointManager,
        engine: Arc<dyn ExecutionEngine>,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                store,
                checkpoints,
                engine,
                queue,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &ModeRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.inner.checkpoints
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.inner.queue
    }

    pub fn engine(&self) -> &Arc<dyn ExecutionEngine> {
        &self.inner.engine
    }

    /// Start a run. Fails with `InvalidMode` before any job exists.
    pub fn start(
        &self,
        mode_id: &str,
        input: serde_json::Value,
    ) -> Result<Started, OrchestrationError> {
        let mode = self.inner.registry.resolve(mode_id)?;
        let job = self.inner.store.create(mode, input);
        self.inner
            .active
            .lock()
            .insert(job.id, CancellationToken::new());

        metrics::counter!("orchestration_jobs_started_total", "mode" => mode.id()).increment(1);
        tracing::info!(job_id = %job.id, mode = %mode, "Orchestration job created");

        if mode.is_interactive() {
            let events = self.inner.store.subscribe(job.id, None)?;
            let dispatcher = self.clone();
            let job_id = job.id;
            let events = events.on_abandon(move || {
                tracing::info!(job_id = %job_id, "Interactive client disconnected, cancelling");
                let _ = dispatcher.cancel(job_id);
            });

            let driver = self.clone();
            tokio::spawn(async move { driver.run_job(job_id).await });
            return Ok(Started::Streaming(JobHandle::from(&job), events));
        }

        let queued = QueuedJob {
            job_id: job.id,
            mode,
        };
        if let Err(e) = self.inner.queue.enqueue(queued) {
            tracing::error!(job_id = %job.id, error = %e, "Failed to enqueue job");
            let _ = self.cancel(job.id);
            return Err(OrchestrationError::invalid_transition(job.id, e.to_string()));
        }
        Ok(Started::Queued(JobHandle::from(&job)))
    }

    /// Cancel a non-terminal job and signal its engine session to abort.
    pub fn cancel(&self, job_id: Uuid) -> Result<Job, OrchestrationError> {
        let job = self.inner.store.cancel(job_id)?;
        if let Some(token) = self.inner.active.lock().remove(&job_id) {
            token.cancel();
        }
        self.inner.checkpoints.forget(job_id);

        metrics::counter!("orchestration_jobs_cancelled_total").increment(1);
        tracing::info!(job_id = %job_id, "Job cancelled");
        Ok(job)
    }

    fn cancel_token(&self, job_id: Uuid) -> CancellationToken {
        let mut active = self.inner.active.lock();
        active.entry(job_id).or_default().clone()
    }

    /// Drive a job from `queued` to a terminal state.
    pub async fn run_job(&self, job_id: Uuid) {
        let token = self.cancel_token(job_id);
        let job = match self.inner.store.start(job_id) {
            Ok(job) => job,
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "Skipping job that can no longer start");
                self.inner.active.lock().remove(&job_id);
                return;
            }
        };
        let policy = self.inner.registry.policy(job.mode);
        let started = Instant::now();

        tracing::info!(job_id = %job_id, mode = %job.mode, "Processing orchestration job");

        let halt = tokio::select! {
            _ = token.cancelled() => Halt::Stopped,
            opened = self.open_session(job_id, job.mode, &job.input) => match opened {
                Ok(mut session) => {
                    let halt = self.drive(job, session.as_mut(), policy, &token).await;
                    if !matches!(halt, Halt::Finished) {
                        session.abort().await;
                    }
                    halt
                }
                Err(e) => Halt::Engine(e),
            },
        };

        if let Halt::Engine(e) = halt {
            tracing::error!(job_id = %job_id, error = %e, retryable = e.retryable, "Engine failure");
            self.fail(job_id, JobError::new(ErrorKind::EngineFailure, e.message, e.retryable));
        }

        self.inner.active.lock().remove(&job_id);
        metrics::histogram!("orchestration_job_duration_seconds")
            .record(started.elapsed().as_secs_f64());
    }

    async fn open_session(
        &self,
        job_id: Uuid,
        mode: Mode,
        input: &serde_json::Value,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        match self.inner.engine.open(mode, input).await {
            Err(e) if e.retryable => {
                self.note_retry(job_id, &e);
                self.inner.engine.open(mode, input).await
            }
            other => other,
        }
    }

    async fn next_step(
        &self,
        job_id: Uuid,
        session: &mut dyn EngineSession,
    ) -> Result<EngineStep, EngineError> {
        match session.next_step().await {
            Err(e) if e.retryable => {
                self.note_retry(job_id, &e);
                session.next_step().await
            }
            other => other,
        }
    }

    fn note_retry(&self, job_id: Uuid, e: &EngineError) {
        metrics::counter!("orchestration_engine_retries_total").increment(1);
        tracing::warn!(job_id = %job_id, error = %e, "Retryable engine error, retrying once");
    }

    async fn drive(
        &self,
        job: Job,
        session: &mut dyn EngineSession,
        policy: ModePolicy,
        token: &CancellationToken,
    ) -> Halt {
        let store = &self.inner.store;
        let job_id = job.id;
        let mut revision = job.revision;

        loop {
            let step = tokio::select! {
                _ = token.cancelled() => return Halt::Stopped,
                step = self.next_step(job_id, session) => step,
            };

            match step {
                Err(e) => return Halt::Engine(e),

                Ok(EngineStep::Turn {
                    status,
                    percent,
                    output,
                }) => {
                    let update = ProgressUpdate {
                        percent: percent.map(clamp_percent),
                        status,
                        output,
                    };
                    match store.update_progress(job_id, revision, update) {
                        Ok(job) => revision = job.revision,
                        Err(e) => {
                            // Cancelled or otherwise taken over; stop mutating.
                            tracing::debug!(job_id = %job_id, error = %e, "Progress rejected, stopping");
                            return Halt::Stopped;
                        }
                    }
                }

                Ok(EngineStep::Checkpoint { payload }) => {
                    let pending = match self.inner.checkpoints.open(job_id, payload, policy) {
                        Ok(pending) => pending,
                        Err(_) if self.is_terminal(job_id) => return Halt::Stopped,
                        Err(e) => {
                            return Halt::Engine(EngineError::fatal(format!(
                                "engine requested an invalid checkpoint: {}",
                                e
                            )))
                        }
                    };

                    let resolution = match self.inner.checkpoints.wait(pending, token).await {
                        CheckpointOutcome::Abandoned => return Halt::Stopped,
                        CheckpointOutcome::TimedOut {
                            resumed: false,
                            resolution,
                        } => {
                            self.fail(
                                job_id,
                                JobError::new(
                                    ErrorKind::CheckpointTimeout,
                                    format!(
                                        "checkpoint {} was not resolved before its deadline",
                                        resolution.checkpoint_id
                                    ),
                                    false,
                                ),
                            );
                            return Halt::Stopped;
                        }
                        CheckpointOutcome::TimedOut { resolution, .. } => resolution,
                        CheckpointOutcome::Resolved(resolution) => {
                            if resolution.status == CheckpointStatus::Rejected
                                && policy.on_reject == RejectAction::FailJob
                            {
                                self.fail(
                                    job_id,
                                    JobError::new(
                                        ErrorKind::CheckpointRejected,
                                        format!(
                                            "checkpoint {} was rejected by the reviewer",
                                            resolution.checkpoint_id
                                        ),
                                        false,
                                    ),
                                );
                                return Halt::Stopped;
                            }
                            resolution
                        }
                    };

                    let resumed = tokio::select! {
                        _ = token.cancelled() => return Halt::Stopped,
                        resumed = session.resume(&resolution) => resumed,
                    };
                    if let Err(e) = resumed {
                        return Halt::Engine(e);
                    }
                    match store.get(job_id) {
                        Ok(job) => revision = job.revision,
                        Err(_) => return Halt::Stopped,
                    }
                }

                Ok(EngineStep::Finished { result }) => {
                    return match store.complete(job_id, result) {
                        Ok(_) => {
                            metrics::counter!("orchestration_jobs_completed_total").increment(1);
                            tracing::info!(job_id = %job_id, "Job completed successfully");
                            Halt::Finished
                        }
                        Err(e) => {
                            tracing::debug!(job_id = %job_id, error = %e, "Completion rejected");
                            Halt::Stopped
                        }
                    };
                }
            }
        }
    }

    fn is_terminal(&self, job_id: Uuid) -> bool {
        self.inner
            .store
            .get(job_id)
            .map_or(true, |job| job.state.is_terminal())
    }

    fn fail(&self, job_id: Uuid, error: JobError) {
        let kind = error.kind;
        match self.inner.store.fail(job_id, error) {
            Ok(_) => {
                metrics::counter!("orchestration_jobs_failed_total", "kind" => kind.to_string())
                    .increment(1);
                tracing::warn!(job_id = %job_id, kind = %kind, "Job failed");
            }
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "Failure not recorded");
            }
        }
    }
}

/// Engine percentages arrive as arbitrary JSON numbers.
fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 100.0).round() as u8
}
