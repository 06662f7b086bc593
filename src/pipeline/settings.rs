//! Acquisition settings resolved when the broadcast loop starts.

use std::time::Duration;

use crate::config::{defaults, Bank, ConfigFault, ConfigKey, MonitorConfig};

/// Timing of one broadcast loop run.
///
/// Resolved from the live config each time the loop enters `Running`, so a
/// reloaded interval takes effect on the next connect-from-zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSettings {
    update_interval: Duration,
    sampling_interval: Duration,
    sample_count: usize,
}

impl AcquisitionSettings {
    /// Check every value the loop depends on and derive the averaging window.
    pub fn resolve(config: &MonitorConfig) -> Result<Self, ConfigFault> {
        config.value(ConfigKey::AfrStoch)?;
        config.correction(Bank::Bank1)?;
        config.correction(Bank::Bank2)?;

        let update = config.value(ConfigKey::UpdateInterval)?;
        let sampling = config.value(ConfigKey::SamplingInterval)?;

        Ok(Self {
            update_interval: to_duration(ConfigKey::UpdateInterval, update)?,
            sampling_interval: to_duration(ConfigKey::SamplingInterval, sampling)?,
            sample_count: sample_count(update, sampling)?,
        })
    }

    /// Readings averaged per broadcast cycle, within `1..=MAX_SAMPLES_PER_WINDOW`.
    pub const fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub const fn sampling_interval(&self) -> Duration {
        self.sampling_interval
    }

    pub const fn update_interval(&self) -> Duration {
        self.update_interval
    }
}

/// `round(update / sampling)`, clamped to a minimum of one sample.
///
/// Windows above [`defaults::MAX_SAMPLES_PER_WINDOW`] are rejected.
fn sample_count(update: f64, sampling: f64) -> Result<usize, ConfigFault> {
    let n = (update / sampling).round();
    if n < 1.0 {
        tracing::warn!(
            update_interval = update,
            sampling_interval = sampling,
            "[BroadcastLoop] Sampling interval exceeds update interval, averaging a single sample"
        );
        return Ok(1);
    }
    if n > defaults::MAX_SAMPLES_PER_WINDOW as f64 {
        return Err(ConfigFault::WindowTooLarge {
            samples: n,
            limit: defaults::MAX_SAMPLES_PER_WINDOW,
        });
    }
    Ok(n as usize)
}

fn to_duration(key: ConfigKey, value: f64) -> Result<Duration, ConfigFault> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigFault::NotFinite { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_window_is_150_samples() {
        let settings = AcquisitionSettings::resolve(&MonitorConfig::default()).unwrap();
        assert_eq!(settings.sample_count(), 150);
        assert_eq!(settings.sampling_interval(), Duration::from_millis(10));
        assert_eq!(settings.update_interval(), Duration::from_millis(1500));
    }

    #[test]
    fn test_degenerate_window_clamps_to_one() {
        let mut config = MonitorConfig::default();
        config.timing.update_interval_secs = 0.5;
        config.timing.sampling_interval_secs = 2.0;
        let settings = AcquisitionSettings::resolve(&config).unwrap();
        assert_eq!(settings.sample_count(), 1);
    }

    #[test]
    fn test_window_rounds_to_nearest() {
        assert_eq!(sample_count(1.0, 0.3), Ok(3));
        assert_eq!(sample_count(1.0, 0.45), Ok(2));
        assert_eq!(sample_count(1.0, 0.6), Ok(2));
    }

    #[test]
    fn test_oversized_window_is_a_config_fault() {
        let mut config = MonitorConfig::default();
        config.timing.update_interval_secs = 1e9;
        config.timing.sampling_interval_secs = 1e-6;
        assert_eq!(
            AcquisitionSettings::resolve(&config),
            Err(ConfigFault::WindowTooLarge {
                samples: 1e15,
                limit: 10_000
            })
        );

        // The limit itself is still accepted.
        config.timing.update_interval_secs = 100.0;
        config.timing.sampling_interval_secs = 0.01;
        assert_eq!(AcquisitionSettings::resolve(&config).map(|s| s.sample_count()), Ok(10_000));
    }

    #[test]
    fn test_bad_values_are_config_faults() {
        let mut config = MonitorConfig::default();
        config.timing.update_interval_secs = -1.0;
        assert!(matches!(
            AcquisitionSettings::resolve(&config),
            Err(ConfigFault::NotPositive {
                key: ConfigKey::UpdateInterval,
                ..
            })
        ));

        let mut config = MonitorConfig::default();
        config.lambda.correction_bank_2 = f64::INFINITY;
        assert!(matches!(
            AcquisitionSettings::resolve(&config),
            Err(ConfigFault::NotFinite {
                key: ConfigKey::CorrectionBank2,
                ..
            })
        ));
    }
}
