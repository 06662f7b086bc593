//! API route definitions
//!
//! - /ws - WebSocket client channel
//! - /health - liveness and session snapshot
//! - /api/v1/history/{temperature,lambda} - recorded samples in a time range
//! - /api/v1/sensors - thermocouple tracking rows
//! - /api/v1/sensors/:id/reset - acknowledge a sensor replacement

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, AppState};
use super::ws;

pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/history/temperature", get(handlers::temperature_history))
        .route("/history/lambda", get(handlers::lambda_history))
        .route("/sensors", get(handlers::list_sensors))
        .route("/sensors/:id/reset", post(handlers::reset_sensor))
        .with_state(state)
}

pub fn root_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}
