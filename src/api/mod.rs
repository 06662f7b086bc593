//! HTTP and WebSocket surface using Axum
//!
//! - `/ws` carries the live event stream and the client events
//! - `/health` reports liveness and the session snapshot
//! - `/api/v1` serves recorded history and sensor tracking

pub mod clock;
pub mod envelope;
pub mod handlers;
mod routes;
pub mod ws;

pub use handlers::AppState;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Environment variable with a comma-separated list of allowed CORS origins.
pub const CORS_ENV_VAR: &str = "EXHAUST_MONITOR_CORS_ORIGINS";

/// Same-origin only unless origins are configured (e.g. a dashboard dev server).
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    match std::env::var(CORS_ENV_VAR) {
        Ok(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

/// Create the complete application router.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state.clone()))
        .merge(routes::root_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
