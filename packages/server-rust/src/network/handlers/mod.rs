//! HTTP handler definitions for the health server.

pub mod health;

pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::ShutdownController;
use crate::engine::AnnotationEngine;

/// Shared state passed to all axum handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    /// Service lifecycle and in-flight delivery tracking.
    pub shutdown: Arc<ShutdownController>,
    /// The engine whose state decides readiness.
    pub engine: AnnotationEngine,
    /// Process start time, used for uptime calculation.
    pub start_time: Instant,
}
