//! Exhaust Monitor: wideband lambda and EGT monitoring
//!
//! Samples two lambda probes and two thermocouples through an MCP3008 ADC,
//! streams averaged values to dashboards over WebSocket and tracks the
//! thermocouples' lifetime and overheat state in an embedded database.
//!
//! ## Architecture
//!
//! - **Acquisition**: raw ADC access (spidev or a deterministic test pattern)
//! - **Sensors**: calibration from volts to lambda / AFR / °C
//! - **Pipeline**: averaging window and the broadcast loop
//! - **Background**: lifetime, overheat and error-notification monitors
//! - **Session**: connection registry that starts and stops the cycles
//! - **Storage**: history and sensor tracking (sled)
//! - **API**: WebSocket channel and the HTTP endpoints

pub mod acquisition;
pub mod api;
pub mod background;
pub mod config;
pub mod pipeline;
pub mod sensors;
pub mod session;
pub mod storage;

pub use acquisition::{open_adc, AcquisitionError, AnalogChannel};
pub use api::{create_app, AppState};
pub use config::{LiveConfig, MonitorConfig};
pub use pipeline::{ClientEvent, ServerEvent};
pub use sensors::SensorSet;
pub use session::{ConnectionRegistry, CycleContext, SessionState};
pub use storage::{InMemoryStore, SensorStore, SledStore, StorageError};
