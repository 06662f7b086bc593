//! Live configuration handle.
//!
//! The sensors resolve calibration values on every read, so a hot reload
//! takes effect on the next sample without restarting any cycle.

use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{ConfigChange, ConfigError, MonitorConfig};

/// Shared, atomically swappable configuration snapshot.
#[derive(Clone)]
pub struct LiveConfig {
    current: Arc<ArcSwap<MonitorConfig>>,
    source: Option<PathBuf>,
}

impl LiveConfig {
    /// Wrap a config that has no backing file (defaults, tests).
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            source: None,
        }
    }

    /// Wrap a config loaded from `path`; `reload()` re-reads that file.
    pub fn with_source(config: MonitorConfig, path: PathBuf) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            source: Some(path),
        }
    }

    /// Current snapshot. Cheap; never blocks writers.
    pub fn snapshot(&self) -> Arc<MonitorConfig> {
        self.current.load_full()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Replace the snapshot, returning the keys whose values changed.
    pub fn replace(&self, config: MonitorConfig) -> Vec<ConfigChange> {
        let next = Arc::new(config);
        let previous = self.current.swap(Arc::clone(&next));
        ConfigChange::diff(&previous, &next)
    }

    /// Re-read the backing file. On error the previous snapshot stays active.
    pub fn reload(&self) -> Result<Vec<ConfigChange>, ConfigError> {
        let path = self.source.as_ref().ok_or(ConfigError::NoSource)?;
        let config = MonitorConfig::load_from_file(path)?;
        for w in config.validation_warnings() {
            tracing::warn!("{}", w);
        }
        Ok(self.replace(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Bank, ConfigKey};

    #[test]
    fn test_replace_is_visible_to_existing_clones() {
        let live = LiveConfig::new(MonitorConfig::default());
        let reader = live.clone();

        let mut updated = MonitorConfig::default();
        updated.lambda.correction_bank_2 = 0.6;
        let changes = live.replace(updated);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].key, ConfigKey::CorrectionBank2.path());
        assert_eq!(reader.snapshot().correction(Bank::Bank2), Ok(0.6));
    }

    #[test]
    fn test_reload_without_source_fails() {
        let live = LiveConfig::new(MonitorConfig::default());
        assert!(matches!(live.reload(), Err(ConfigError::NoSource)));
    }

    #[test]
    fn test_reload_keeps_previous_snapshot_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor_config.toml");
        std::fs::write(&path, "[lambda]\nafr_stoch = 14.7\n").unwrap();

        let config = MonitorConfig::load_from_file(&path).unwrap();
        let live = LiveConfig::with_source(config, path.clone());
        assert_eq!(live.snapshot().value(ConfigKey::AfrStoch), Ok(14.7));

        std::fs::write(&path, "[lambda\nafr_stoch = ").unwrap();
        assert!(matches!(live.reload(), Err(ConfigError::Parse(..))));
        assert_eq!(live.snapshot().value(ConfigKey::AfrStoch), Ok(14.7));

        std::fs::write(&path, "[lambda]\nafr_stoch = 14.6\n").unwrap();
        let changes = live.reload().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(live.snapshot().value(ConfigKey::AfrStoch), Ok(14.6));
    }
}
