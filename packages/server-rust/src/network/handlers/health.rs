//! Health, liveness, and readiness endpoint handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::engine::EngineState;
use crate::network::HealthState;

/// Returns detailed health information as JSON.
///
/// Always returns 200; the `state` and `engine` fields tell whether the
/// service is actually able to answer requests.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();
    let engine = state.engine.state();
    let in_flight = state.shutdown.in_flight_count();
    let uptime_secs = state.start_time.elapsed().as_secs();
    let engine_error = state.engine.init_error().map(ToString::to_string);

    Json(json!({
        "state": health.as_str(),
        "engine": engine.as_str(),
        "engine_error": engine_error,
        "in_flight": in_flight,
        "uptime_secs": uptime_secs,
    }))
}

/// Liveness probe: always 200 while the process runs.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 only while the service is Ready and the engine has
/// not failed to initialize, 503 otherwise.
///
/// A lazily constructed engine that has not been built yet counts as ready.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    let service_ready = state.shutdown.health_state() == HealthState::Ready;
    let engine_usable = state.engine.state() != EngineState::Failed;
    if service_ready && engine_usable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
