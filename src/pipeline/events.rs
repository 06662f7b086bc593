//! Client event channel payloads.
//!
//! Every WebSocket frame is a JSON text message `{"event": <name>, "data": <payload>}`.
//! Field names (including the historical `lamda` spelling) are what the
//! dashboard script reads.

use serde::{Deserialize, Serialize};

use super::averaging::AveragedSample;
use crate::sensors::TemperaturePair;

/// Events pushed to every connected client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "newValues")]
    NewValues(NewValues),
    #[serde(rename = "error")]
    Error(ErrorPayload),
    #[serde(rename = "info")]
    Info(InfoPayload),
}

impl ServerEvent {
    pub fn info(msg: impl Into<String>) -> Self {
        Self::Info(InfoPayload { msg: msg.into() })
    }

    /// Wire event name, for logging.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewValues(_) => "newValues",
            Self::Error(_) => "error",
            Self::Info(_) => "info",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One broadcast cycle: averaged lambda banks plus the latest temperatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewValues {
    pub lamda1: f64,
    pub lamda2: f64,
    pub volt1: f64,
    pub volt2: f64,
    pub afr1: f64,
    pub afr2: f64,
    pub temp1: i32,
    pub temp2: i32,
    pub temp1_voltage: f64,
    pub temp2_voltage: f64,
}

impl NewValues {
    pub fn new(lambda: &AveragedSample, temps: &TemperaturePair) -> Self {
        Self {
            lamda1: lambda.bank_1.lambda,
            lamda2: lambda.bank_2.lambda,
            volt1: lambda.bank_1.volt,
            volt2: lambda.bank_2.volt,
            afr1: lambda.bank_1.afr,
            afr2: lambda.bank_2.afr,
            temp1: temps.sensor_0.temp,
            temp2: temps.sensor_1.temp,
            temp1_voltage: temps.sensor_0.volt,
            temp2_voltage: temps.sensor_1.volt,
        }
    }
}

/// Fault class shown by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// A configuration value is missing or unusable; fix the config and reconnect.
    Config,
    /// Anything else (hardware transport, storage).
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    /// One-line summary.
    pub exc: String,
    /// Full error chain, outermost first.
    pub traceback: String,
}

impl ErrorPayload {
    /// Build from an error and its `source()` chain.
    pub fn from_error(kind: ErrorKind, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut traceback = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            traceback.push_str("\ncaused by: ");
            traceback.push_str(&cause.to_string());
            source = cause.source();
        }
        Self {
            kind,
            exc: error.to_string(),
            traceback,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoPayload {
    pub msg: String,
}

/// Events received from a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientEvent {
    /// Dashboard opened; `time` is the browser clock as ISO-8601.
    Connected { time: String },
    /// Toggle lambda journaling.
    Recording { recording: bool },
    /// Explicit goodbye. Closing the socket has the same effect.
    Disconnect,
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
