//! Human-in-the-loop orchestration service
//!
//! Dispatches AI orchestration requests across four execution modes (manual or
//! automatic expert selection, interactive or autonomous execution), tracks each
//! run as a job with a strict lifecycle, suspends runs at human checkpoints, and
//! streams job events to clients over Server-Sent Events.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
