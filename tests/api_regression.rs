//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` over a
//! temporary sled database and exercise every HTTP endpoint using
//! `tower::ServiceExt::oneshot()`. No binary spawn, no network port.

use exhaust_monitor::acquisition::TestPatternAdc;
use exhaust_monitor::storage::SensorTrackingRecord;
use exhaust_monitor::{
    create_app, AppState, ConnectionRegistry, CycleContext, LiveConfig, MonitorConfig, SensorSet,
    SensorStore, SessionState, SledStore,
};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn create_test_app() -> (Router, Arc<SledStore>) {
    let store = Arc::new(SledStore::temporary().unwrap());
    for id in [0, 1] {
        store.ensure_tracking(id).unwrap();
    }
    let shared: Arc<dyn SensorStore> = store.clone();
    let config = LiveConfig::new(MonitorConfig::default());
    let (events, _) = broadcast::channel(16);
    let registry = Arc::new(ConnectionRegistry::new(
        CycleContext {
            sensors: SensorSet::new(Arc::new(TestPatternAdc::with_seed(2, 0, 1023, 7)), config.clone()),
            store: Arc::clone(&shared),
            events,
            shutdown: CancellationToken::new(),
        },
        Arc::new(SessionState::default()),
    ));
    (create_app(AppState::new(registry, shared, config)), store)
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, body)
}

/// All GET endpoints with valid input should return 200 inside the envelope.
#[tokio::test]
async fn test_get_endpoints_return_200() {
    let (app, _store) = create_test_app();

    let endpoints = [
        "/health",
        "/api/v1/sensors",
        "/api/v1/history/temperature?start_time=2024-01-01T00:00:00Z&end_time=2024-12-31T00:00:00Z",
        "/api/v1/history/lambda?start_time=2024-01-01%2000:00:00&end_time=2024-12-31%2000:00:00",
    ];

    for endpoint in endpoints {
        let (status, body) = send(&app, Method::GET, endpoint).await;
        assert_eq!(status, StatusCode::OK, "GET {endpoint}");
        assert!(body.get("data").is_some(), "GET {endpoint} missing data");
        assert!(body["meta"]["generated_at"].is_string(), "GET {endpoint} missing meta");
    }
}

#[tokio::test]
async fn test_health_reports_idle_session() {
    let (app, _store) = create_test_app();
    let (_, body) = send(&app, Method::GET, "/health").await;

    assert_eq!(body["data"]["storage_backend"], "sled");
    assert_eq!(body["data"]["session"]["connections"], 0);
    assert_eq!(body["data"]["session"]["recording"], false);
    assert_eq!(body["data"]["session"]["broadcast_running"], false);
}

#[tokio::test]
async fn test_history_bad_bounds_return_400() {
    let (app, _store) = create_test_app();

    let cases = [
        "/api/v1/history/temperature",
        "/api/v1/history/temperature?end_time=2024-01-01T00:00:00Z",
        "/api/v1/history/lambda?start_time=2024-01-01T00:00:00Z",
        "/api/v1/history/lambda?start_time=last%20week&end_time=2024-01-01T00:00:00Z",
        "/api/v1/history/lambda?start_time=2024-02-01T00:00:00Z&end_time=2024-01-01T00:00:00Z",
    ];

    for uri in cases {
        let (status, body) = send(&app, Method::GET, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "GET {uri}");
        assert_eq!(body["error"]["code"], "BAD_TIME_BOUND", "GET {uri}");
    }
}

#[tokio::test]
async fn test_temperature_history_is_ordered_and_bounded() {
    let (app, store) = create_test_app();
    let at = |h| Utc.with_ymd_and_hms(2024, 3, 10, h, 0, 0).unwrap();
    store.append_temperature(1, 640, at(14)).unwrap();
    store.append_temperature(0, 512, at(12)).unwrap();
    store.append_temperature(0, 900, at(20)).unwrap();

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/history/temperature?start_time=2024-03-10T11:00:00Z&end_time=2024-03-10T15:00:00Z",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["sensor_id"], 0);
    assert_eq!(rows[0]["value"], 512.0);
    assert_eq!(rows[1]["sensor_id"], 1);
    assert_eq!(rows[1]["value"], 640.0);
}

#[tokio::test]
async fn test_sensor_listing_and_reset() {
    let (app, store) = create_test_app();
    store.set_error(0, "Maximum lifetime exceeded! Sensor has been running for 100 hours. Please replace!").unwrap();
    store
        .update_tracking(0, &|r: &mut SensorTrackingRecord| r.time_run_in_minutes = 6_000)
        .unwrap();

    let (_, body) = send(&app, Method::GET, "/api/v1/sensors").await;
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["error_state"], true);
    assert_eq!(rows[0]["time_run_in_minutes"], 6_000);

    let (status, body) = send(&app, Method::POST, "/api/v1/sensors/0/reset").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["error_state"], false);
    assert_eq!(body["data"]["time_run_in_minutes"], 0);
    assert_eq!(body["data"]["error_message"], "");

    let record = store.tracking(0).unwrap();
    assert!(!record.error_state);
    assert_eq!(record.time_run_in_minutes, 0);
}

#[tokio::test]
async fn test_reset_unknown_or_malformed_sensor() {
    let (app, _store) = create_test_app();

    let (status, body) = send(&app, Method::POST, "/api/v1/sensors/4/reset").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "UNKNOWN_SENSOR");

    let (status, _) = send(&app, Method::POST, "/api/v1/sensors/abc/reset").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (app, _store) = create_test_app();
    let (status, _) = send(&app, Method::GET, "/api/v1/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ws_requires_upgrade() {
    let (app, _store) = create_test_app();
    let (status, _) = send(&app, Method::GET, "/ws").await;
    assert!(status.is_client_error());
}
