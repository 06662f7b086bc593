//! Sensor Persistence
//!
//! Two kinds of data survive restarts:
//! - **History**: append-only temperature and lambda samples, pruned by age
//!   at startup and range-queried by the history API
//! - **Tracking**: one [`SensorTrackingRecord`] per thermocouple, holding the
//!   accumulated hot runtime and the current error state
//!
//! Tracking rows are mutated by several independent cycles (lifetime,
//! overheat, the reset route). Every mutation goes through
//! [`SensorStore::update_tracking`], which is a single atomic
//! read-modify-write on the row.

mod memory;
mod sled_store;

pub use memory::InMemoryStore;
pub use sled_store::SledStore;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Database directory name inside the configured data dir.
pub const DB_DIR_NAME: &str = "monitor.db";

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no tracking record for sensor {0}")]
    UnknownSensor(u8),

    #[error("tracking record for sensor {0} is corrupt")]
    Corrupt(u8),

    #[error("storage lock poisoned: {0}")]
    Lock(String),
}

/// Which history stream a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStream {
    Temperature,
    Lambda,
}

impl HistoryStream {
    pub const ALL: [Self; 2] = [Self::Temperature, Self::Lambda];

    pub const fn tree_name(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Lambda => "lambda",
        }
    }
}

/// One persisted history point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSample {
    pub sensor_id: u8,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Runtime and error state of one thermocouple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorTrackingRecord {
    pub sensor_id: u8,
    pub time_run_in_minutes: u64,
    pub error_state: bool,
    pub error_message: String,
}

impl SensorTrackingRecord {
    /// Fresh row for a newly installed sensor.
    pub fn new(sensor_id: u8) -> Self {
        Self {
            sensor_id,
            time_run_in_minutes: 0,
            error_state: false,
            error_message: String::new(),
        }
    }

    /// Raise the error flag with `message`.
    pub fn raise(&mut self, message: impl Into<String>) {
        self.error_state = true;
        self.error_message = message.into();
    }

    /// Sensor replaced: runtime back to zero, error cleared.
    pub fn reset(&mut self) {
        self.time_run_in_minutes = 0;
        self.error_state = false;
        self.error_message.clear();
    }
}

/// Persistence collaborator used by the cycles and the API.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks.
pub trait SensorStore: Send + Sync {
    /// Append one sample to a history stream.
    fn append(
        &self,
        stream: HistoryStream,
        sensor_id: u8,
        value: f64,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Samples with `start <= timestamp <= end`, oldest first.
    fn history(
        &self,
        stream: HistoryStream,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalSample>, StorageError>;

    /// Delete samples older than `cutoff` from every stream. Returns the count removed.
    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;

    /// Create the tracking row for `sensor_id` if absent. Returns whether it was created.
    fn ensure_tracking(&self, sensor_id: u8) -> Result<bool, StorageError>;

    fn tracking(&self, sensor_id: u8) -> Result<SensorTrackingRecord, StorageError>;

    fn list_tracking(&self) -> Result<Vec<SensorTrackingRecord>, StorageError>;

    /// Atomically apply `update` to the row and return the stored result.
    ///
    /// `update` may be invoked more than once under contention and must
    /// derive its result only from the record it is given.
    fn update_tracking(
        &self,
        sensor_id: u8,
        update: &dyn Fn(&mut SensorTrackingRecord),
    ) -> Result<SensorTrackingRecord, StorageError>;

    fn flush(&self) -> Result<(), StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;

    fn append_temperature(&self, sensor_id: u8, temp: i32, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.append(HistoryStream::Temperature, sensor_id, f64::from(temp), at)
    }

    fn append_lambda(&self, sensor_id: u8, lambda: f64, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.append(HistoryStream::Lambda, sensor_id, lambda, at)
    }

    fn set_error(&self, sensor_id: u8, message: &str) -> Result<SensorTrackingRecord, StorageError> {
        self.update_tracking(sensor_id, &|record: &mut SensorTrackingRecord| {
            record.raise(message)
        })
    }

    fn reset_sensor(&self, sensor_id: u8) -> Result<SensorTrackingRecord, StorageError> {
        self.update_tracking(sensor_id, &SensorTrackingRecord::reset)
    }
}

/// Nanoseconds since the epoch, saturating outside the representable range.
pub(crate) fn timestamp_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp().saturating_mul(1_000_000_000))
}

/// Oldest timestamp kept when history is retained for `days`.
///
/// `None` when `days` is not positive or the cutoff is not representable.
pub fn retention_cutoff(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    if days <= 0 {
        return None;
    }
    TimeDelta::try_days(days).and_then(|keep| now.checked_sub_signed(keep))
}
