use serde::Deserialize;
use std::time::Duration;

use crate::services::mode_mapper::ModeRegistry;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Base URL of the Python AI execution engine
    pub engine_url: String,

    /// Bearer token for the execution engine
    #[serde(default)]
    pub engine_api_token: Option<String>,

    /// Per-request timeout for engine calls, in seconds
    #[serde(default = "default_engine_timeout_secs")]
    pub engine_timeout_secs: u64,

    /// PostgreSQL connection string. Jobs are only kept in memory when unset.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Number of workers driving autonomous jobs
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Live events buffered per job before slow subscribers fall back to the log
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// How long terminal jobs are kept before being purged, in seconds
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Overrides every mode's checkpoint timeout, in seconds
    #[serde(default)]
    pub checkpoint_timeout_secs: Option<u64>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_engine_timeout_secs() -> u64 {
    120
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_event_buffer() -> usize {
    256
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Mode policies with any configured overrides applied.
    pub fn mode_registry(&self) -> ModeRegistry {
        let registry = ModeRegistry::default();
        match self.checkpoint_timeout_secs {
            Some(secs) => registry.with_checkpoint_timeout(Duration::from_secs(secs)),
            None => registry,
        }
    }
}
