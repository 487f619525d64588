use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::services::dispatcher::Dispatcher;
use crate::services::queue::JobQueue;

/// Spawn `concurrency` workers that drive autonomous jobs off the queue.
pub fn spawn_workers(dispatcher: Dispatcher, concurrency: usize) -> Vec<JoinHandle<()>> {
    let concurrency = concurrency.max(1);
    tracing::info!(concurrency, "Starting orchestration workers");
    (0..concurrency)
        .map(|worker_id| {
            let dispatcher = dispatcher.clone();
            let queue = dispatcher.queue().clone();
            tokio::spawn(async move { worker_loop(worker_id, dispatcher, queue).await })
        })
        .collect()
}

async fn worker_loop(worker_id: usize, dispatcher: Dispatcher, queue: Arc<JobQueue>) {
    while let Some(job) = queue.dequeue().await {
        tracing::debug!(worker_id, job_id = %job.job_id, mode = %job.mode, "Worker picked up job");
        dispatcher.run_job(job.job_id).await;
    }
    tracing::info!(worker_id, "Job queue closed, worker exiting");
}
