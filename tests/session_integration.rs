//! Session Integration Tests
//!
//! Drives the connection registry end to end on virtual time: the broadcast
//! loop, the three monitors and the store working together behind a
//! fixed-value ADC.

use exhaust_monitor::acquisition::{AcquisitionError, AnalogChannel, RawSample};
use exhaust_monitor::pipeline::ErrorKind;
use exhaust_monitor::storage::HistoryStream;
use exhaust_monitor::{
    ConnectionRegistry, CycleContext, InMemoryStore, LiveConfig, MonitorConfig, SensorSet,
    SensorStore, ServerEvent, SessionState,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Fixed raw value per channel.
struct ChannelMap([RawSample; 8]);

impl AnalogChannel for ChannelMap {
    fn read(&self, channel: u8) -> Result<RawSample, AcquisitionError> {
        Ok(self.0[usize::from(channel)])
    }

    fn source_name(&self) -> &str {
        "channel-map"
    }
}

/// Lambda at raw 511 on both banks, thermocouple 0 at 420 °C, thermocouple 1 at 50 °C.
const NORMAL: [RawSample; 8] = [511, 511, 344, 41, 0, 0, 0, 0];

/// Thermocouple 0 at 1151 °C.
const OVERHEATING: [RawSample; 8] = [511, 511, 942, 41, 0, 0, 0, 0];

struct Harness {
    registry: ConnectionRegistry,
    store: Arc<InMemoryStore>,
    config: LiveConfig,
    events: broadcast::Receiver<ServerEvent>,
}

fn harness(raw: [RawSample; 8]) -> Harness {
    let mut config = MonitorConfig::default();
    config.timing.update_interval_secs = 1.0;
    config.timing.sampling_interval_secs = 0.1;
    let config = LiveConfig::new(config);

    let store = Arc::new(InMemoryStore::with_sensors(&[0, 1]));
    let (tx, rx) = broadcast::channel(256);
    let ctx = CycleContext {
        sensors: SensorSet::new(Arc::new(ChannelMap(raw)), config.clone()),
        store: store.clone(),
        events: tx,
        shutdown: CancellationToken::new(),
    };
    Harness {
        registry: ConnectionRegistry::new(ctx, Arc::new(SessionState::default())),
        store,
        config,
        events: rx,
    }
}

fn drain(rx: &mut broadcast::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn new_values(events: &[ServerEvent]) -> usize {
    events.iter().filter(|e| matches!(e, ServerEvent::NewValues(_))).count()
}

#[tokio::test(start_paused = true)]
async fn test_stream_recording_and_last_disconnect() {
    let mut h = harness(NORMAL);

    h.registry.connect();
    sleep(Duration::from_millis(3_500)).await;

    let events = drain(&mut h.events);
    assert!(new_values(&events) >= 3, "got {events:?}");
    match &events[0] {
        ServerEvent::NewValues(v) => {
            assert_eq!(v.temp1, 420);
            assert_eq!(v.temp2, 50);
        }
        other => panic!("unexpected first event {other:?}"),
    }

    // Only the hot thermocouple is journaled; lambda waits for recording.
    let temps = h.store.samples(HistoryStream::Temperature);
    assert!(!temps.is_empty());
    assert!(temps.iter().all(|s| s.sensor_id == 0 && s.value == 420.0));
    assert_eq!(h.store.sample_count(HistoryStream::Lambda), 0);

    h.registry.set_recording(true);
    sleep(Duration::from_millis(2_500)).await;
    let lambda = h.store.samples(HistoryStream::Lambda);
    assert!(lambda.len() >= 4);
    assert!(lambda.iter().any(|s| s.sensor_id == 1));

    h.registry.disconnect();
    assert!(!h.registry.session().is_recording());
    sleep(Duration::from_secs(3)).await;
    drain(&mut h.events);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(new_values(&drain(&mut h.events)), 0);

    let snap = h.registry.snapshot();
    assert!(!snap.broadcast_running);
    assert_eq!(snap.monitors_running, 3);
    h.registry.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_second_client_does_not_double_the_stream() {
    let mut h = harness(NORMAL);

    h.registry.connect();
    h.registry.connect();
    assert_eq!(h.registry.snapshot().loop_starts, 1);

    sleep(Duration::from_millis(4_500)).await;
    let count = new_values(&drain(&mut h.events));
    assert!((4..=5).contains(&count), "got {count} frames");

    // One client leaving keeps the stream alive for the other.
    h.registry.disconnect();
    sleep(Duration::from_secs(2)).await;
    assert!(h.registry.broadcast_running());
    h.registry.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_rapid_reconnect_keeps_a_single_loop() {
    let mut h = harness(NORMAL);

    h.registry.connect();
    sleep(Duration::from_millis(500)).await;
    h.registry.disconnect();
    h.registry.connect();
    assert_eq!(h.registry.snapshot().loop_starts, 2);

    drain(&mut h.events);
    sleep(Duration::from_millis(4_200)).await;
    let count = new_values(&drain(&mut h.events));
    assert!(count <= 5, "two loops running: {count} frames");
    assert!(count >= 3);
    h.registry.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_overheat_is_flagged_notified_and_reset() {
    let mut h = harness(OVERHEATING);
    h.registry.connect();

    sleep(Duration::from_secs(5)).await;
    let record = h.store.tracking(0).unwrap();
    assert!(record.error_state);
    assert_eq!(
        record.error_message,
        "Overheating! Temperature reached 1151°C. Please replace!"
    );
    assert!(record.time_run_in_minutes >= 1);
    assert!(!h.store.tracking(1).unwrap().error_state);

    sleep(Duration::from_secs(26)).await;
    let infos: Vec<String> = drain(&mut h.events)
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::Info(p) => Some(p.msg),
            _ => None,
        })
        .collect();
    assert_eq!(
        infos,
        vec!["Warning: temperature sensor 0 reports an error: \
              Overheating! Temperature reached 1151°C. Please replace!"
            .to_string()]
    );

    let reset = h.store.reset_sensor(0).unwrap();
    assert!(!reset.error_state);
    assert_eq!(reset.time_run_in_minutes, 0);
    h.registry.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_bad_calibration_surfaces_as_config_error_event() {
    let mut h = harness(NORMAL);
    let mut broken = (*h.config.snapshot()).clone();
    broken.lambda.afr_stoch = f64::NAN;
    h.config.replace(broken);

    h.registry.connect();
    sleep(Duration::from_millis(100)).await;

    let errors: Vec<_> = drain(&mut h.events)
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::Error(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::Config);
    assert!(!h.registry.broadcast_running());

    // The monitors are independent of the faulted loop.
    assert_eq!(h.registry.snapshot().monitors_running, 3);
    h.registry.shutdown();
}
