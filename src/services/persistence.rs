use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::db::queries;
use crate::services::job_store::MirrorOp;

/// Write store changes through to Postgres, in the order they were made.
///
/// Failures are logged and dropped: the in-memory store stays authoritative.
pub fn spawn_mirror(pool: PgPool, mut rx: mpsc::UnboundedReceiver<MirrorOp>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            match op {
                MirrorOp::Upsert(job) => {
                    if let Err(e) = queries::upsert_job(&pool, &job).await {
                        tracing::error!(job_id = %job.id, error = %e, "Failed to persist job");
                    }
                }
                MirrorOp::Delete(job_id) => {
                    if let Err(e) = queries::delete_job(&pool, job_id).await {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to delete persisted job");
                    }
                }
            }
        }
        tracing::info!("Persistence mirror stopped");
    })
}
