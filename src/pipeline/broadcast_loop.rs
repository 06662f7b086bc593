//! Broadcast loop: acquire, broadcast, persist.
//!
//! ```text
//!   Idle ──connect from 0──▶ Running ──token cancelled──▶ Idle
//!                               │
//!                               └──fault──▶ emit `error` event, exit
//! ```
//!
//! Cancellation is only observed between cycles, never inside an average.
//! Within a cycle acquisition completes before the broadcast, and the
//! broadcast before persistence; there is no await point between the
//! latter two.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::averaging::{average, AveragingError};
use super::events::{ErrorKind, ErrorPayload, NewValues, ServerEvent};
use super::settings::AcquisitionSettings;
use crate::acquisition::AcquisitionError;
use crate::config::{defaults, Bank, ConfigFault};
use crate::sensors::{LambdaSensor, SensorError, SensorSet};
use crate::session::SessionState;
use crate::storage::{SensorStore, StorageError};

/// Fault that ends a broadcast loop run.
#[derive(Debug, Error)]
pub enum CycleFault {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigFault),

    #[error("hardware error: {0}")]
    Hardware(#[from] AcquisitionError),

    #[error("{0}")]
    DegenerateWindow(AveragingError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CycleFault {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::DegenerateWindow(_) => ErrorKind::Config,
            Self::Hardware(_) | Self::Storage(_) => ErrorKind::Unknown,
        }
    }

    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error(ErrorPayload::from_error(self.kind(), self))
    }
}

impl From<SensorError> for CycleFault {
    fn from(err: SensorError) -> Self {
        match err {
            SensorError::Acquisition(e) => Self::Hardware(e),
            SensorError::Config(e) => Self::Config(e),
        }
    }
}

impl From<AveragingError> for CycleFault {
    fn from(err: AveragingError) -> Self {
        match err {
            AveragingError::Sensor(e) => e.into(),
            degenerate @ AveragingError::DegenerateSampleCount => Self::DegenerateWindow(degenerate),
        }
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum LoopExit {
    /// Token cancelled (last client left or shutdown).
    Stopped { cycles: u64 },
    /// A cycle failed; the `error` event has been sent.
    Faulted(CycleFault),
}

/// One run of the polling cycle, from connect-from-zero to stop or fault.
pub struct BroadcastLoop {
    sensors: SensorSet,
    store: Arc<dyn SensorStore>,
    events: broadcast::Sender<ServerEvent>,
    session: Arc<SessionState>,
    cancel_token: CancellationToken,
}

impl BroadcastLoop {
    pub fn new(
        sensors: SensorSet,
        store: Arc<dyn SensorStore>,
        events: broadcast::Sender<ServerEvent>,
        session: Arc<SessionState>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            sensors,
            store,
            events,
            session,
            cancel_token,
        }
    }

    /// Run until cancelled or faulted. Never restarts itself.
    pub async fn run(self) -> LoopExit {
        match self.run_cycles().await {
            Ok(cycles) => {
                info!(cycles, "[BroadcastLoop] Stopped");
                LoopExit::Stopped { cycles }
            }
            Err(fault) => {
                error!(kind = ?fault.kind(), error = %fault, "[BroadcastLoop] Cycle failed, loop terminated");
                self.publish(fault.to_event());
                LoopExit::Faulted(fault)
            }
        }
    }

    async fn run_cycles(&self) -> Result<u64, CycleFault> {
        let settings = AcquisitionSettings::resolve(&self.sensors.config().snapshot())?;
        let bank_1 = self.sensors.lambda(Bank::Bank1)?;
        let bank_2 = self.sensors.lambda(Bank::Bank2)?;
        // Fail on a bad thermocouple channel before the first window.
        self.sensors.temperature(0)?;
        self.sensors.temperature(1)?;

        info!(
            samples = settings.sample_count(),
            update_interval_ms = settings.update_interval().as_millis() as u64,
            "[BroadcastLoop] Started"
        );

        let mut cycles = 0u64;
        while !self.cancel_token.is_cancelled() {
            self.cycle(&settings, &bank_1, &bank_2).await?;
            cycles += 1;
            self.session.record_cycle();
        }
        Ok(cycles)
    }

    /// Acquire, broadcast, persist. Returns the broadcast payload.
    pub async fn cycle(
        &self,
        settings: &AcquisitionSettings,
        bank_1: &LambdaSensor,
        bank_2: &LambdaSensor,
    ) -> Result<NewValues, CycleFault> {
        let lambda = average(bank_1, bank_2, settings.sample_count(), settings.sampling_interval()).await?;
        let temps = self.sensors.read_temperatures()?;

        let values = NewValues::new(&lambda, &temps);
        self.publish(ServerEvent::NewValues(values.clone()));

        let now = Utc::now();
        for (sensor_id, reading) in temps.by_id() {
            if reading.temp > defaults::HOT_THRESHOLD_C {
                self.store.append_temperature(sensor_id, reading.temp, now)?;
            }
        }
        if self.session.is_recording() {
            self.store.append_lambda(0, lambda.bank_1.lambda, now)?;
            self.store.append_lambda(1, lambda.bank_2.lambda, now)?;
        }

        Ok(values)
    }

    fn publish(&self, event: ServerEvent) {
        let name = event.name();
        if self.events.send(event).is_err() {
            debug!(event = name, "[BroadcastLoop] No clients subscribed, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{AnalogChannel, RawSample, TestPatternAdc};
    use crate::config::{LiveConfig, MonitorConfig};
    use crate::storage::{HistoryStream, InMemoryStore};
    use std::time::Duration;

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

    struct Harness {
        store: Arc<InMemoryStore>,
        session: Arc<SessionState>,
        events: broadcast::Receiver<ServerEvent>,
        token: CancellationToken,
        looper: BroadcastLoop,
    }

    fn harness(adc: Arc<dyn AnalogChannel>, config: MonitorConfig) -> Harness {
        let store = Arc::new(InMemoryStore::with_sensors(&[0, 1]));
        let session = Arc::new(SessionState::default());
        let (tx, rx) = broadcast::channel(16);
        let token = CancellationToken::new();
        let looper = BroadcastLoop::new(
            SensorSet::new(adc, LiveConfig::new(config)),
            store.clone(),
            tx,
            session.clone(),
            token.clone(),
        );
        Harness {
            store,
            session,
            events: rx,
            token,
            looper,
        }
    }

    fn fast_config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.timing.update_interval_secs = 0.05;
        config.timing.sampling_interval_secs = 0.01;
        config
    }

    /// Lambda channels at raw 511, thermocouple 0 at 420 °C, thermocouple 1 at 50 °C.
    fn hot_and_cold() -> Arc<dyn AnalogChannel> {
        Arc::new(ChannelMap([511, 511, 344, 41, 0, 0, 0, 0]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_broadcasts_then_persists_hot_temperatures() {
        let mut h = harness(hot_and_cold(), fast_config());
        let settings = AcquisitionSettings::resolve(&fast_config()).unwrap();
        let b1 = h.looper.sensors.lambda(Bank::Bank1).unwrap();
        let b2 = h.looper.sensors.lambda(Bank::Bank2).unwrap();

        let values = h.looper.cycle(&settings, &b1, &b2).await.unwrap();
        assert_eq!(values.temp1, 420);
        assert_eq!(values.temp2, 50);
        assert!((values.lamda1 - 1.011).abs() < 1e-9);

        match h.events.recv().await.unwrap() {
            ServerEvent::NewValues(v) => assert_eq!(v, values),
            other => panic!("unexpected event {other:?}"),
        }

        let temps = h.store.samples(HistoryStream::Temperature);
        assert_eq!(temps.len(), 1);
        assert_eq!(temps[0].sensor_id, 0);
        assert_eq!(temps[0].value, 420.0);
        assert_eq!(h.store.sample_count(HistoryStream::Lambda), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lambda_is_journaled_only_while_recording() {
        let h = harness(hot_and_cold(), fast_config());
        let settings = AcquisitionSettings::resolve(&fast_config()).unwrap();
        let b1 = h.looper.sensors.lambda(Bank::Bank1).unwrap();
        let b2 = h.looper.sensors.lambda(Bank::Bank2).unwrap();

        h.session.set_recording(true);
        h.looper.cycle(&settings, &b1, &b2).await.unwrap();
        h.session.set_recording(false);
        h.looper.cycle(&settings, &b1, &b2).await.unwrap();

        let lambda = h.store.samples(HistoryStream::Lambda);
        assert_eq!(lambda.len(), 2);
        assert_eq!(
            lambda.iter().map(|s| s.sensor_id).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_cycle_boundary() {
        let h = harness(
            Arc::new(TestPatternAdc::with_seed(1, 0, 1023, 5)),
            fast_config(),
        );
        let token = h.token.clone();
        let session = h.session.clone();
        let task = tokio::spawn(h.looper.run());

        tokio::time::sleep(Duration::from_millis(175)).await;
        token.cancel();

        match task.await.unwrap() {
            LoopExit::Stopped { cycles } => {
                assert!(cycles >= 3);
                assert_eq!(session.cycles(), cycles);
            }
            LoopExit::Faulted(f) => panic!("unexpected fault {f}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_config_emits_config_error_and_exits() {
        let mut config = fast_config();
        config.lambda.afr_stoch = -14.68;
        let mut h = harness(hot_and_cold(), config);

        let exit = h.looper.run().await;
        assert!(matches!(exit, LoopExit::Faulted(CycleFault::Config(_))));

        match h.events.recv().await.unwrap() {
            ServerEvent::Error(payload) => {
                assert_eq!(payload.kind, ErrorKind::Config);
                assert!(payload.exc.contains("lambda.afr_stoch"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_window_faults_before_any_read() {
        struct Untouchable;
        impl AnalogChannel for Untouchable {
            fn read(&self, _channel: u8) -> Result<RawSample, AcquisitionError> {
                panic!("converter read with an unusable averaging window");
            }
            fn source_name(&self) -> &str {
                "untouchable"
            }
        }

        let mut config = MonitorConfig::default();
        config.timing.update_interval_secs = 1e9;
        config.timing.sampling_interval_secs = 1e-6;
        let mut h = harness(Arc::new(Untouchable), config);

        let exit = h.looper.run().await;
        assert!(matches!(
            exit,
            LoopExit::Faulted(CycleFault::Config(ConfigFault::WindowTooLarge { .. }))
        ));
        match h.events.recv().await.unwrap() {
            ServerEvent::Error(payload) => assert_eq!(payload.kind, ErrorKind::Config),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hot_reloaded_bad_value_faults_as_config() {
        let h = harness(hot_and_cold(), fast_config());
        let live = h.looper.sensors.config().clone();
        let mut rx = h.events;
        let task = tokio::spawn(h.looper.run());

        assert!(matches!(rx.recv().await.unwrap(), ServerEvent::NewValues(_)));
        let mut broken = fast_config();
        broken.lambda.correction_bank_1 = f64::NAN;
        live.replace(broken);

        let exit = task.await.unwrap();
        assert!(matches!(exit, LoopExit::Faulted(CycleFault::Config(_))));
        h.token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_is_unknown_kind() {
        struct Dead;
        impl AnalogChannel for Dead {
            fn read(&self, channel: u8) -> Result<RawSample, AcquisitionError> {
                Err(AcquisitionError::Transport {
                    channel,
                    source: std::io::Error::from(std::io::ErrorKind::TimedOut),
                })
            }
            fn source_name(&self) -> &str {
                "dead"
            }
        }

        let mut h = harness(Arc::new(Dead), fast_config());
        let exit = h.looper.run().await;
        assert!(matches!(exit, LoopExit::Faulted(CycleFault::Hardware(_))));
        match h.events.recv().await.unwrap() {
            ServerEvent::Error(payload) => assert_eq!(payload.kind, ErrorKind::Unknown),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
