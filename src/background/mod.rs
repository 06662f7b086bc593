//! Background monitors: sensor lifetime, overheat and error notification
//!
//! Each monitor runs as its own tokio task on a fixed cadence. They start
//! with the first client connection and keep running after the last client
//! leaves; only process shutdown cancels them. A failed iteration is logged
//! and the monitor carries on with the next one.
//!
//! | Monitor            | Period | Reads                 | Writes                   |
//! |--------------------|--------|-----------------------|--------------------------|
//! | `LifetimeTracker`  | 60 s   | thermocouples         | runtime minutes, error   |
//! | `OverheatDetector` | 2 s    | thermocouples         | error                    |
//! | `ErrorNotifier`    | 30 s   | tracking rows         | `info` events to clients |

pub mod lifetime;
pub mod notifier;
pub mod overheat;

pub use overheat::OverheatDetector;

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleep for `period`; returns `false` if the token was cancelled first.
pub(crate) async fn pause(period: Duration, cancel_token: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel_token.cancelled() => false,
        () = tokio::time::sleep(period) => true,
    }
}
