//! Monitor Configuration Module
//!
//! Provides calibration, channel assignments and timing loaded from a TOML
//! file, with hot reload.
//!
//! ## Loading Order
//!
//! 1. `EXHAUST_MONITOR_CONFIG` environment variable (path to TOML file)
//! 2. `monitor_config.toml` in the current working directory
//! 3. Built-in defaults (matching the historical settings file)
//!
//! ## Usage
//!
//! The loaded config is wrapped once in a [`LiveConfig`] and handed to every
//! component that needs it; there is no process-wide global.
//!
//! ```ignore
//! let (config, path) = MonitorConfig::load();
//! let live = match path {
//!     Some(p) => LiveConfig::with_source(config, p),
//!     None => LiveConfig::new(config),
//! };
//! let afr = live.snapshot().value(ConfigKey::AfrStoch)?;
//! ```

mod live;
mod monitor_config;
pub mod defaults;
pub mod watcher;

pub use live::LiveConfig;
pub use monitor_config::*;

use serde::Serialize;

/// One value that differs between two config snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigChange {
    /// Dotted key path, e.g. `lambda.correction_bank_1`
    pub key: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

impl ConfigChange {
    /// Keys whose values differ between `old` and `new`.
    pub fn diff(old: &MonitorConfig, new: &MonitorConfig) -> Vec<Self> {
        let before = old.flatten();
        let after = new.flatten();

        let mut changes: Vec<Self> = after
            .iter()
            .filter(|(k, v)| before.get(*k) != Some(*v))
            .map(|(k, v)| Self {
                key: k.clone(),
                old: before.get(k).cloned(),
                new: Some(v.clone()),
            })
            .collect();

        changes.extend(
            before
                .iter()
                .filter(|(k, _)| !after.contains_key(*k))
                .map(|(k, v)| Self {
                    key: k.clone(),
                    old: Some(v.clone()),
                    new: None,
                }),
        );

        changes
    }
}

impl std::fmt::Display for ConfigChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.key,
            self.old.as_deref().unwrap_or("<unset>"),
            self.new.as_deref().unwrap_or("<unset>")
        )
    }
}
