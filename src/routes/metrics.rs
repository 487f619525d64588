use axum::extract::State;
use axum::response::IntoResponse;

use crate::app_state::MetricsHandle;

/// Prometheus metrics scrape endpoint.
/// Returns metrics in Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<MetricsHandle>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the orchestrator records.
pub fn describe() {
    metrics::describe_counter!(
        "orchestration_jobs_started_total",
        "Orchestration jobs created, by mode"
    );
    metrics::describe_counter!(
        "orchestration_jobs_completed_total",
        "Orchestration jobs that succeeded"
    );
    metrics::describe_counter!(
        "orchestration_jobs_failed_total",
        "Orchestration jobs that failed, by error kind"
    );
    metrics::describe_counter!(
        "orchestration_jobs_cancelled_total",
        "Orchestration jobs cancelled by a caller or a disconnect"
    );
    metrics::describe_counter!(
        "orchestration_checkpoints_opened_total",
        "Checkpoints raised for human review"
    );
    metrics::describe_counter!(
        "orchestration_checkpoint_timeouts_total",
        "Checkpoints that expired without a decision"
    );
    metrics::describe_counter!(
        "orchestration_engine_retries_total",
        "Engine calls retried after a retryable failure"
    );
    metrics::describe_gauge!(
        "orchestration_queue_depth",
        "Autonomous jobs waiting for a worker"
    );
    metrics::describe_histogram!(
        "orchestration_job_duration_seconds",
        "Wall time from job start until the driver stops"
    );
}
