//! In-memory sensor store for tests and runs without a data directory.
//!
//! Thread-safe via `RwLock`. Not durable; data is lost on restart.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{
    timestamp_nanos, HistoricalSample, HistoryStream, SensorStore, SensorTrackingRecord,
    StorageError,
};

type HistoryKey = (i64, u8);

#[derive(Default)]
pub struct InMemoryStore {
    temperature: RwLock<BTreeMap<HistoryKey, HistoricalSample>>,
    lambda: RwLock<BTreeMap<HistoryKey, HistoricalSample>>,
    tracking: RwLock<BTreeMap<u8, SensorTrackingRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with tracking rows already created for `sensor_ids`.
    pub fn with_sensors(sensor_ids: &[u8]) -> Self {
        let store = Self::new();
        if let Ok(mut rows) = store.tracking.write() {
            for &id in sensor_ids {
                rows.insert(id, SensorTrackingRecord::new(id));
            }
        }
        store
    }

    const fn stream(&self, stream: HistoryStream) -> &RwLock<BTreeMap<HistoryKey, HistoricalSample>> {
        match stream {
            HistoryStream::Temperature => &self.temperature,
            HistoryStream::Lambda => &self.lambda,
        }
    }

    /// Number of samples in a stream.
    pub fn sample_count(&self, stream: HistoryStream) -> usize {
        self.stream(stream).read().map(|s| s.len()).unwrap_or(0)
    }

    /// All samples of a stream, oldest first.
    pub fn samples(&self, stream: HistoryStream) -> Vec<HistoricalSample> {
        self.stream(stream)
            .read()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned(e: impl std::fmt::Display) -> StorageError {
    StorageError::Lock(e.to_string())
}

impl SensorStore for InMemoryStore {
    fn append(
        &self,
        stream: HistoryStream,
        sensor_id: u8,
        value: f64,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut samples = self.stream(stream).write().map_err(poisoned)?;
        samples.insert(
            (timestamp_nanos(at), sensor_id),
            HistoricalSample {
                sensor_id,
                timestamp: at,
                value,
            },
        );
        Ok(())
    }

    fn history(
        &self,
        stream: HistoryStream,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalSample>, StorageError> {
        if end < start {
            return Ok(Vec::new());
        }
        let samples = self.stream(stream).read().map_err(poisoned)?;
        Ok(samples
            .range((timestamp_nanos(start), 0)..=(timestamp_nanos(end), u8::MAX))
            .map(|(_, sample)| sample.clone())
            .collect())
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let cutoff = timestamp_nanos(cutoff);
        let mut deleted = 0;
        for stream in HistoryStream::ALL {
            let mut samples = self.stream(stream).write().map_err(poisoned)?;
            let before = samples.len();
            samples.retain(|(nanos, _), _| *nanos >= cutoff);
            deleted += before - samples.len();
        }
        Ok(deleted)
    }

    fn ensure_tracking(&self, sensor_id: u8) -> Result<bool, StorageError> {
        let mut rows = self.tracking.write().map_err(poisoned)?;
        if rows.contains_key(&sensor_id) {
            return Ok(false);
        }
        rows.insert(sensor_id, SensorTrackingRecord::new(sensor_id));
        Ok(true)
    }

    fn tracking(&self, sensor_id: u8) -> Result<SensorTrackingRecord, StorageError> {
        let rows = self.tracking.read().map_err(poisoned)?;
        rows.get(&sensor_id)
            .cloned()
            .ok_or(StorageError::UnknownSensor(sensor_id))
    }

    fn list_tracking(&self) -> Result<Vec<SensorTrackingRecord>, StorageError> {
        let rows = self.tracking.read().map_err(poisoned)?;
        Ok(rows.values().cloned().collect())
    }

    fn update_tracking(
        &self,
        sensor_id: u8,
        update: &dyn Fn(&mut SensorTrackingRecord),
    ) -> Result<SensorTrackingRecord, StorageError> {
        let mut rows = self.tracking.write().map_err(poisoned)?;
        let record = rows
            .get_mut(&sensor_id)
            .ok_or(StorageError::UnknownSensor(sensor_id))?;
        update(record);
        Ok(record.clone())
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}
