//! Acquisition Pipeline
//!
//! ```text
//! ┌──────────────┐   n reads, sampling_interval apart   ┌────────────────┐
//! │ LambdaSensor │ ───────────────────────────────────▶ │  average()     │
//! │  bank 1 / 2  │                                      └───────┬────────┘
//! └──────────────┘                                              │
//! ┌──────────────┐   latest reading (not averaged)              ▼
//! │ Temperature  │ ─────────────────────────────────▶ BroadcastLoop::cycle
//! │  sensor 0/1  │                                     │ newValues → clients
//! └──────────────┘                                     │ > 100 °C  → history
//!                                                      │ recording → lambda history
//! ```

pub mod averaging;
pub mod broadcast_loop;
pub mod events;
pub mod settings;

pub use averaging::{average, AveragedSample, AveragingError};
pub use broadcast_loop::{BroadcastLoop, CycleFault, LoopExit};
pub use events::{ClientEvent, ErrorKind, ErrorPayload, InfoPayload, NewValues, ServerEvent};
pub use settings::AcquisitionSettings;
