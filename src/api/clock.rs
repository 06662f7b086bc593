//! System clock synchronization from the browser time.
//!
//! The Pi has no RTC, so on a fresh boot without network its clock is
//! wrong until a dashboard connects and sends its own time.

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::process::Command;
use tracing::info;

use super::handlers::parse_time;

#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    #[error("client time is not an ISO-8601 timestamp: {0:?}")]
    InvalidTime(String),

    #[error("failed to run date: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("date exited with {status}: {stderr}")]
    Failed { status: std::process::ExitStatus, stderr: String },
}

/// Argument handed to `date -s`.
pub fn date_argument(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Set the system clock to `raw`. Requires the privilege to change the time.
pub async fn sync_system_clock(raw: &str) -> Result<DateTime<Utc>, ClockError> {
    let time = parse_time(raw).ok_or_else(|| ClockError::InvalidTime(raw.to_string()))?;

    let output = Command::new("date").arg("-s").arg(date_argument(time)).output().await?;
    if !output.status.success() {
        return Err(ClockError::Failed {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    info!(time = %time, "System clock set from client");
    Ok(time)
}
