pub mod checkpoints;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod modes;
pub mod orchestrate;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::Router;
use futures::{Stream, StreamExt};
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::{AppState, MetricsHandle};
use crate::services::events::EventStream;

const BODY_LIMIT: usize = 1024 * 1024;

/// Build the HTTP API. `metrics` is mounted at `/metrics` when given.
pub fn router(state: AppState, metrics: Option<MetricsHandle>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/orchestrate", post(orchestrate::start_orchestration))
        .route("/api/v1/modes", get(modes::list_modes))
        .route("/api/v1/jobs", get(jobs::list_jobs))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job))
        .route("/api/v1/jobs/{job_id}/events", get(jobs::job_events))
        .route("/api/v1/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .route(
            "/api/v1/checkpoints/{checkpoint_id}",
            post(checkpoints::resolve_checkpoint),
        )
        .with_state(state);

    if let Some(handle) = metrics {
        app = app.route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(handle),
        );
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
}

/// Frame a job's events as SSE: `id` is the sequence number, `event` the kind.
pub(crate) fn sse(events: EventStream) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = events.into_stream().map(|event| {
        Event::default()
            .id(event.seq.to_string())
            .event(event.kind.name())
            .json_data(&event)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
