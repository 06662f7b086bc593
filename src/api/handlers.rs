//! HTTP handlers: health, history range queries, sensor tracking

use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use super::envelope::{self, ApiError, Bound};
use crate::config::LiveConfig;
use crate::session::{ConnectionRegistry, SessionSnapshot};
use crate::storage::{HistoryStream, SensorStore};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<dyn SensorStore>,
    pub config: LiveConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn SensorStore>, config: LiveConfig) -> Self {
        Self {
            registry,
            store,
            config,
            started_at: Instant::now(),
        }
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub storage_backend: &'static str,
    pub session: SessionSnapshot,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    envelope::ok(HealthResponse {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        storage_backend: state.store.backend_name(),
        session: state.registry.snapshot(),
    })
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// Parse an ISO-8601 bound. Offsets are honoured; naive values are UTC.
pub fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn bound(which: Bound, raw: Option<&str>) -> Result<DateTime<Utc>, ApiError> {
    let raw = raw.ok_or(ApiError::MissingBound(which))?;
    parse_time(raw).ok_or_else(|| ApiError::InvalidBound {
        bound: which,
        raw: raw.to_string(),
    })
}

fn history(state: &AppState, stream: HistoryStream, query: &HistoryQuery) -> Result<Response, ApiError> {
    let start = bound(Bound::Start, query.start_time.as_deref())?;
    let end = bound(Bound::End, query.end_time.as_deref())?;
    if start > end {
        return Err(ApiError::InvertedRange { start, end });
    }
    Ok(envelope::ok(state.store.history(stream, start, end)?))
}

/// GET /api/v1/history/temperature?start_time=..&end_time=..
pub async fn temperature_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    history(&state, HistoryStream::Temperature, &query)
}

/// GET /api/v1/history/lambda?start_time=..&end_time=..
pub async fn lambda_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    history(&state, HistoryStream::Lambda, &query)
}

// ============================================================================
// Sensor tracking
// ============================================================================

/// GET /api/v1/sensors
pub async fn list_sensors(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(envelope::ok(state.store.list_tracking()?))
}

/// POST /api/v1/sensors/:id/reset - acknowledge a sensor replacement
pub async fn reset_sensor(
    State(state): State<AppState>,
    Path(sensor_id): Path<u8>,
) -> Result<Response, ApiError> {
    let record = state.store.reset_sensor(sensor_id)?;
    info!(sensor = sensor_id, "Sensor reset after replacement");
    Ok(envelope::ok(record))
}

/// State over a seeded test-pattern ADC and default config.
#[cfg(test)]
pub(crate) fn test_state(store: Arc<dyn SensorStore>) -> AppState {
    use crate::acquisition::TestPatternAdc;
    use crate::config::MonitorConfig;
    use crate::sensors::SensorSet;
    use crate::session::{CycleContext, SessionState};
    use tokio::sync::broadcast;
    use tokio_util::sync::CancellationToken;

    let config = LiveConfig::new(MonitorConfig::default());
    let (events, _) = broadcast::channel(16);
    let ctx = CycleContext {
        sensors: SensorSet::new(Arc::new(TestPatternAdc::with_seed(1, 0, 1023, 3)), config.clone()),
        store: Arc::clone(&store),
        events,
        shutdown: CancellationToken::new(),
    };
    let registry = Arc::new(ConnectionRegistry::new(ctx, Arc::new(SessionState::default())));
    AppState::new(registry, store, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_time("2024-05-01T12:30:00Z"), Some(expected));
        assert_eq!(parse_time("2024-05-01T14:30:00+02:00"), Some(expected));
        assert_eq!(parse_time("2024-05-01T12:30:00"), Some(expected));
        assert_eq!(parse_time("2024-05-01 12:30:00"), Some(expected));
        assert_eq!(parse_time("2024-05-01 12:30:00.250").map(|t| t.timestamp_subsec_millis()), Some(250));
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        assert_eq!(parse_time(""), None);
        assert_eq!(parse_time("yesterday"), None);
        assert_eq!(parse_time("2024-13-01T00:00:00"), None);
    }
}
