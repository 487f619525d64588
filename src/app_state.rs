use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;

use crate::services::dispatcher::Dispatcher;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    /// Present only when persistence is configured.
    pub db: Option<PgPool>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, db: Option<PgPool>) -> Self {
        Self { dispatcher, db }
    }
}

/// State for the Prometheus scrape endpoint.
pub type MetricsHandle = Arc<PrometheusHandle>;
