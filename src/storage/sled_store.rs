//! Sled-backed sensor store.
//!
//! Trees:
//! - `temperature`, `lambda`: key = i64 nanos with the sign bit flipped
//!   (big-endian) ++ sensor id, value = JSON [`HistoricalSample`]. Keys sort
//!   chronologically, including across the epoch.
//! - `sensor_tracking`: key = sensor id, value = JSON [`SensorTrackingRecord`].

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

use super::{
    timestamp_nanos, HistoricalSample, HistoryStream, SensorStore, SensorTrackingRecord,
    StorageError, DB_DIR_NAME,
};

const TRACKING_TREE: &str = "sensor_tracking";

#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
    temperature: sled::Tree,
    lambda: sled::Tree,
    tracking: sled::Tree,
}

impl SledStore {
    /// Open or create `<data_dir>/monitor.db`.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        let path = data_dir.join(DB_DIR_NAME);
        let db = sled::open(&path)?;
        let store = Self {
            temperature: db.open_tree(HistoryStream::Temperature.tree_name())?,
            lambda: db.open_tree(HistoryStream::Lambda.tree_name())?,
            tracking: db.open_tree(TRACKING_TREE)?,
            db: Arc::new(db),
        };
        tracing::info!(path = %path.display(), "Sensor store opened");
        Ok(store)
    }

    /// Temporary database for tests; deleted on drop.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            temperature: db.open_tree(HistoryStream::Temperature.tree_name())?,
            lambda: db.open_tree(HistoryStream::Lambda.tree_name())?,
            tracking: db.open_tree(TRACKING_TREE)?,
            db: Arc::new(db),
        })
    }

    const fn tree(&self, stream: HistoryStream) -> &sled::Tree {
        match stream {
            HistoryStream::Temperature => &self.temperature,
            HistoryStream::Lambda => &self.lambda,
        }
    }

    /// Size of the database on disk in bytes
    pub fn size_bytes(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }
}

fn history_key(at: DateTime<Utc>, sensor_id: u8) -> [u8; 9] {
    let ordered = (timestamp_nanos(at) as u64) ^ (1 << 63);
    let mut key = [0u8; 9];
    key[..8].copy_from_slice(&ordered.to_be_bytes());
    key[8] = sensor_id;
    key
}

impl SensorStore for SledStore {
    fn append(
        &self,
        stream: HistoryStream,
        sensor_id: u8,
        value: f64,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let sample = HistoricalSample {
            sensor_id,
            timestamp: at,
            value,
        };
        // No flush per write; sled flushes in the background and the
        // shutdown path flushes explicitly.
        self.tree(stream)
            .insert(history_key(at, sensor_id), serde_json::to_vec(&sample)?)?;
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
        let from = history_key(start, 0);
        let to = history_key(end, u8::MAX);

        self.tree(stream)
            .range(from..=to)
            .map(|item| -> Result<HistoricalSample, StorageError> {
                let (_key, value) = item?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let cutoff_key = history_key(cutoff, 0);
        let mut deleted = 0;

        for stream in HistoryStream::ALL {
            let tree = self.tree(stream);
            let keys: Vec<sled::IVec> = tree
                .range(..cutoff_key)
                .keys()
                .collect::<Result<_, _>>()?;
            for key in keys {
                tree.remove(key)?;
                deleted += 1;
            }
        }

        if deleted > 0 {
            self.db.flush()?;
        }
        Ok(deleted)
    }

    fn ensure_tracking(&self, sensor_id: u8) -> Result<bool, StorageError> {
        let fresh = serde_json::to_vec(&SensorTrackingRecord::new(sensor_id))?;
        let created = self
            .tracking
            .compare_and_swap([sensor_id], None as Option<&[u8]>, Some(fresh))?
            .is_ok();
        Ok(created)
    }

    fn tracking(&self, sensor_id: u8) -> Result<SensorTrackingRecord, StorageError> {
        let bytes = self
            .tracking
            .get([sensor_id])?
            .ok_or(StorageError::UnknownSensor(sensor_id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn list_tracking(&self) -> Result<Vec<SensorTrackingRecord>, StorageError> {
        self.tracking
            .iter()
            .values()
            .map(|value| -> Result<SensorTrackingRecord, StorageError> {
                Ok(serde_json::from_slice(&value?)?)
            })
            .collect()
    }

    fn update_tracking(
        &self,
        sensor_id: u8,
        update: &dyn Fn(&mut SensorTrackingRecord),
    ) -> Result<SensorTrackingRecord, StorageError> {
        let mut corrupt = false;
        let stored = self.tracking.update_and_fetch([sensor_id], |old| {
            let old = old?;
            match serde_json::from_slice::<SensorTrackingRecord>(old) {
                Ok(mut record) => {
                    corrupt = false;
                    update(&mut record);
                    Some(serde_json::to_vec(&record).unwrap_or_else(|_| old.to_vec()))
                }
                Err(_) => {
                    corrupt = true;
                    Some(old.to_vec())
                }
            }
        })?;

        if corrupt {
            return Err(StorageError::Corrupt(sensor_id));
        }
        let bytes = stored.ok_or(StorageError::UnknownSensor(sensor_id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}
