//! Error notifier - repeats stored sensor errors to connected clients.
//!
//! Every 30 seconds each tracked sensor in error produces one `info` event.
//! The stored state is never cleared here; that is the reset route's job.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pause;
use crate::config::defaults::{NOTIFIER_CYCLE_SECS, TRACKED_SENSOR_IDS};
use crate::pipeline::ServerEvent;
use crate::storage::{SensorStore, StorageError};

pub fn notification_message(sensor_id: u8, message: &str) -> String {
    format!("Warning: temperature sensor {sensor_id} reports an error: {message}")
}

/// Emit one `info` event per sensor in error. Returns how many were emitted.
pub fn step(
    store: &dyn SensorStore,
    events: &broadcast::Sender<ServerEvent>,
) -> Result<usize, StorageError> {
    let mut emitted = 0;
    for sensor_id in TRACKED_SENSOR_IDS {
        let record = store.tracking(sensor_id)?;
        if !record.error_state {
            continue;
        }
        let msg = notification_message(sensor_id, &record.error_message);
        if events.send(ServerEvent::info(msg)).is_err() {
            debug!(sensor = sensor_id, "[ErrorNotifier] No clients subscribed");
        }
        emitted += 1;
    }
    Ok(emitted)
}

pub async fn run(
    store: Arc<dyn SensorStore>,
    events: broadcast::Sender<ServerEvent>,
    cancel_token: CancellationToken,
) {
    info!(period_secs = NOTIFIER_CYCLE_SECS, "[ErrorNotifier] Started");
    let period = Duration::from_secs(NOTIFIER_CYCLE_SECS);

    loop {
        if let Err(e) = step(store.as_ref(), &events) {
            warn!(error = %e, "[ErrorNotifier] Failed to read error state");
        }

        if !pause(period, &cancel_token).await {
            info!("[ErrorNotifier] Stopped");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    #[test]
    fn test_emits_one_info_per_sensor_in_error() {
        let store = InMemoryStore::with_sensors(&[0, 1]);
        let (tx, mut rx) = broadcast::channel(8);

        assert_eq!(step(&store, &tx).unwrap(), 0);
        assert!(rx.try_recv().is_err());

        store.set_error(1, "Overheating! Temperature reached 1150°C. Please replace!").unwrap();
        assert_eq!(step(&store, &tx).unwrap(), 1);

        match rx.try_recv().unwrap() {
            ServerEvent::Info(payload) => assert_eq!(
                payload.msg,
                "Warning: temperature sensor 1 reports an error: \
                 Overheating! Temperature reached 1150°C. Please replace!"
            ),
            other => panic!("unexpected event {other:?}"),
        }

        // State is left untouched.
        assert!(store.tracking(1).unwrap().error_state);
    }

    #[test]
    fn test_missing_rows_are_an_error() {
        let store = InMemoryStore::new();
        let (tx, _rx) = broadcast::channel(8);
        assert!(matches!(step(&store, &tx), Err(StorageError::UnknownSensor(0))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_repeats_every_period() {
        let store = Arc::new(InMemoryStore::with_sensors(&[0, 1]));
        store.set_error(0, "x").unwrap();
        let (tx, mut rx) = broadcast::channel(8);
        let token = CancellationToken::new();
        let task = tokio::spawn(run(store.clone(), tx, token.clone()));

        tokio::time::sleep(Duration::from_secs(61)).await;
        token.cancel();
        task.await.unwrap();

        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
