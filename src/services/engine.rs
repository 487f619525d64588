//! Seam between the dispatcher and the external execution engine.
//!
//! The engine (the Python AI backend in production) runs the actual expert
//! reasoning. The dispatcher only sees a session that yields steps, may ask
//! for a human checkpoint, and can be resumed or aborted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::checkpoint::Resolution;
use crate::models::mode::Mode;

/// One unit of output from an engine session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineStep {
    /// A turn of work. Relayed to subscribers as a progress event.
    Turn {
        status: String,
        /// Completion estimate; any number, clamped to 0..=100 when recorded.
        #[serde(default)]
        percent: Option<f64>,
        #[serde(default)]
        output: Option<serde_json::Value>,
    },
    /// The engine needs human input before it can continue.
    Checkpoint { payload: serde_json::Value },
    /// The run is finished.
    Finished { result: serde_json::Value },
}

/// Failure reported by (or while talking to) the engine.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    pub retryable: bool,
}

impl EngineError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Start a session for `mode` with the caller's input.
    async fn open(
        &self,
        mode: Mode,
        input: &serde_json::Value,
    ) -> Result<Box<dyn EngineSession>, EngineError>;

    /// Reachability probe for health checks.
    async fn health_check(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

#[async_trait]
pub trait EngineSession: Send {
    async fn next_step(&mut self) -> Result<EngineStep, EngineError>;

    /// Deliver a checkpoint outcome; the next `next_step` continues from it.
    async fn resume(&mut self, resolution: &Resolution) -> Result<(), EngineError>;

    /// Best-effort stop of in-flight work.
    async fn abort(&mut self);
}
