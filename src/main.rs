use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use hitl_orchestrator::app_state::AppState;
use hitl_orchestrator::config::AppConfig;
use hitl_orchestrator::db;
use hitl_orchestrator::routes;
use hitl_orchestrator::services::{
    checkpoint::CheckpointManager, dispatcher::Dispatcher, http_engine::HttpEngine,
    job_store::JobStore, persistence, queue::JobQueue, worker,
};

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing hitl-orchestrator server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    // Optional PostgreSQL mirror
    let (store, db_pool) = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to PostgreSQL database");
            let pool = db::init_pool(database_url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Running database migrations");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");

            let (tx, rx) = mpsc::unbounded_channel();
            persistence::spawn_mirror(pool.clone(), rx);
            (JobStore::with_mirror(config.event_buffer, tx), Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, jobs are kept in memory only");
            (JobStore::new(config.event_buffer), None)
        }
    };

    tracing::info!(engine_url = %config.engine_url, "Initializing execution engine client");
    let engine = HttpEngine::new(
        &config.engine_url,
        config.engine_api_token.clone(),
        config.engine_timeout(),
    )
    .expect("Failed to initialize execution engine client");

    let checkpoints = CheckpointManager::new(store.clone());
    let dispatcher = Dispatcher::new(
        config.mode_registry(),
        store.clone(),
        checkpoints,
        Arc::new(engine),
        Arc::new(JobQueue::new()),
    );

    worker::spawn_workers(dispatcher.clone(), config.worker_concurrency);
    spawn_retention_sweeper(store, config.retention());

    let state = AppState::new(dispatcher, db_pool);
    let app = routes::router(state, Some(prometheus_handle));

    tracing::info!("Starting hitl-orchestrator on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

/// Purge terminal jobs older than the retention window, once a minute.
fn spawn_retention_sweeper(store: JobStore, retention: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let Ok(retention) = chrono::Duration::from_std(retention) else {
                tracing::error!("Retention window out of range, sweeper stopped");
                return;
            };
            let purged = store.purge_expired(chrono::Utc::now() - retention);
            if purged > 0 {
                tracing::info!(purged, "Purged expired jobs");
            }
        }
    });
}
