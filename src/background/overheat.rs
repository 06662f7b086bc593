//! Overheat detector.
//!
//! Polls both thermocouples every 2 seconds. A per-sensor counter grows by
//! the cycle period while the reading is above 1100 °C and resets to zero on
//! the first reading at or below it. The sensor is flagged once the counter
//! exceeds the 2-second grace window, i.e. on the second consecutive hot
//! sample. A single-sample spike never trips it.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::pause;
use crate::config::defaults::{OVERHEAT_CYCLE_SECS, OVERHEAT_GRACE_SECS, OVERHEAT_THRESHOLD_C};
use crate::sensors::{SensorSet, TemperaturePair};
use crate::storage::{SensorStore, StorageError};

pub fn overheat_message(temp: i32) -> String {
    format!("Overheating! Temperature reached {temp}°C. Please replace!")
}

/// A sensor that has been over the threshold past the grace window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverheatTrip {
    pub sensor_id: u8,
    pub temp: i32,
}

/// Per-sensor seconds-over-threshold counters.
#[derive(Debug, Default)]
pub struct OverheatDetector {
    seconds_over: [u64; 2],
}

impl OverheatDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn seconds_over(&self, sensor_id: u8) -> u64 {
        self.seconds_over[(sensor_id & 1) as usize]
    }

    /// Advance the counters by one cycle. Pure; no persistence.
    pub fn observe(&mut self, temps: &TemperaturePair) -> Vec<OverheatTrip> {
        let mut trips = Vec::new();
        for (sensor_id, reading) in temps.by_id() {
            let counter = &mut self.seconds_over[usize::from(sensor_id)];
            if reading.temp > OVERHEAT_THRESHOLD_C {
                *counter += OVERHEAT_CYCLE_SECS;
            } else {
                *counter = 0;
            }
            if *counter > OVERHEAT_GRACE_SECS {
                trips.push(OverheatTrip {
                    sensor_id,
                    temp: reading.temp,
                });
            }
        }
        trips
    }

    /// Observe one cycle and flag tripped sensors in the store.
    pub fn step(
        &mut self,
        store: &dyn SensorStore,
        temps: &TemperaturePair,
    ) -> Result<Vec<OverheatTrip>, StorageError> {
        let trips = self.observe(temps);
        for trip in &trips {
            store.set_error(trip.sensor_id, &overheat_message(trip.temp))?;
            warn!(
                sensor = trip.sensor_id,
                temp = trip.temp,
                "[OverheatDetector] Sensor overheating"
            );
        }
        Ok(trips)
    }
}

pub async fn run(sensors: SensorSet, store: Arc<dyn SensorStore>, cancel_token: CancellationToken) {
    info!(
        period_secs = OVERHEAT_CYCLE_SECS,
        threshold_c = OVERHEAT_THRESHOLD_C,
        "[OverheatDetector] Started"
    );
    let period = Duration::from_secs(OVERHEAT_CYCLE_SECS);
    let mut detector = OverheatDetector::new();

    loop {
        match sensors.read_temperatures() {
            Ok(temps) => {
                if let Err(e) = detector.step(store.as_ref(), &temps) {
                    warn!(error = %e, "[OverheatDetector] Failed to set error state");
                }
            }
            Err(e) => warn!(error = %e, "[OverheatDetector] Failed to read temperatures"),
        }

        if !pause(period, &cancel_token).await {
            info!("[OverheatDetector] Stopped");
            return;
        }
    }
}
