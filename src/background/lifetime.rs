//! Lifetime tracker - accumulates hot runtime per thermocouple.
//!
//! Every 60 seconds each sensor reading above 100 °C is credited one minute.
//! At 6000 minutes (100 hours) the sensor is flagged for replacement. The
//! flag is a maintenance notice; acquisition continues.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::pause;
use crate::config::defaults::{HOT_THRESHOLD_C, LIFETIME_CYCLE_SECS, SENSOR_LIFETIME_MINUTES};
use crate::sensors::{SensorSet, TemperaturePair};
use crate::storage::{SensorStore, SensorTrackingRecord, StorageError};

/// Minutes credited per hot cycle.
const MINUTES_PER_CYCLE: u64 = LIFETIME_CYCLE_SECS / 60;

pub fn lifetime_message(minutes: u64) -> String {
    format!(
        "Maximum lifetime exceeded! Sensor has been running for {} hours. Please replace!",
        minutes / 60
    )
}

/// One tracker iteration against already-read temperatures.
///
/// Each row is updated in a single atomic read-modify-write: the runtime
/// credit and the limit check see the same record.
pub fn step(
    store: &dyn SensorStore,
    temps: &TemperaturePair,
) -> Result<[SensorTrackingRecord; 2], StorageError> {
    let [(id_0, reading_0), (id_1, reading_1)] = temps.by_id();
    Ok([
        credit(store, id_0, reading_0.temp > HOT_THRESHOLD_C)?,
        credit(store, id_1, reading_1.temp > HOT_THRESHOLD_C)?,
    ])
}

fn credit(store: &dyn SensorStore, sensor_id: u8, hot: bool) -> Result<SensorTrackingRecord, StorageError> {
    let before = store.tracking(sensor_id)?.error_state;
    let record = store.update_tracking(sensor_id, &|record: &mut SensorTrackingRecord| {
        if hot {
            record.time_run_in_minutes += MINUTES_PER_CYCLE;
        }
        if record.time_run_in_minutes >= SENSOR_LIFETIME_MINUTES {
            record.raise(lifetime_message(record.time_run_in_minutes));
        }
    })?;

    if record.error_state && !before {
        warn!(
            sensor = sensor_id,
            minutes = record.time_run_in_minutes,
            "[LifetimeTracker] Sensor lifetime exceeded"
        );
    }
    Ok(record)
}

pub async fn run(sensors: SensorSet, store: Arc<dyn SensorStore>, cancel_token: CancellationToken) {
    info!(period_secs = LIFETIME_CYCLE_SECS, "[LifetimeTracker] Started");
    let period = Duration::from_secs(LIFETIME_CYCLE_SECS);

    loop {
        match sensors.read_temperatures() {
            Ok(temps) => {
                if let Err(e) = step(store.as_ref(), &temps) {
                    warn!(error = %e, "[LifetimeTracker] Failed to update tracking rows");
                }
            }
            Err(e) => warn!(error = %e, "[LifetimeTracker] Failed to read temperatures"),
        }

        if !pause(period, &cancel_token).await {
            info!("[LifetimeTracker] Stopped");
            return;
        }
    }
}
