use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::models::mode::Mode;

/// Entry on the autonomous job queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub mode: Mode,
}

/// In-process FIFO feeding the worker pool.
pub struct JobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    rx: Mutex<mpsc::UnboundedReceiver<QueuedJob>>,
    depth: AtomicU64,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            depth: AtomicU64::new(0),
        }
    }

    /// Enqueue a job for a worker to pick up.
    pub fn enqueue(&self, job: QueuedJob) -> Result<(), QueueError> {
        self.tx.send(job).map_err(|_| QueueError::Closed)?;
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!("orchestration_queue_depth").set(depth as f64);
        Ok(())
    }

    /// Wait for the next job. Workers share the receiver, one pop at a time.
    pub async fn dequeue(&self) -> Option<QueuedJob> {
        let job = self.rx.lock().await.recv().await?;
        let depth = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| Some(d.saturating_sub(1)))
            .map_or(0, |prev| prev.saturating_sub(1));
        metrics::gauge!("orchestration_queue_depth").set(depth as f64);
        Some(job)
    }

    /// Current number of jobs waiting for a worker.
    pub fn queue_depth(&self) -> u64 {
        self.depth.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,
}
