//! Sensor data acquisition module
//!
//! Abstracts the analog-to-digital converter behind [`AnalogChannel`] so the
//! sensors and cycles run identically against the MCP3008 on the SPI bus or
//! against the simulated oscillator.

pub mod mcp3008;
pub mod test_pattern;

pub use mcp3008::Mcp3008;
pub use test_pattern::TestPatternAdc;

use std::sync::Arc;
use thiserror::Error;

use crate::config::{defaults, AdcConfig, AdcSource};

/// Raw converter sample in `0..=1023`.
pub type RawSample = u16;

/// ADC transport errors (the HardwareFault class).
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Failed to open {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SPI transfer on channel {channel} failed: {source}")]
    Transport {
        channel: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("Channel {channel} does not exist (converter has {count} inputs)")]
    InvalidChannel { channel: u8, count: u8 },
}

/// One addressable converter.
///
/// `read` is a blocking, bounded-latency hardware transaction (tens of
/// microseconds on SPI). It is called inline from async cycles for that
/// reason; it never waits on anything unbounded.
pub trait AnalogChannel: Send + Sync {
    /// Read one raw sample from `channel`.
    fn read(&self, channel: u8) -> Result<RawSample, AcquisitionError>;

    /// Human-readable name for logging (e.g. "MCP3008", "test-pattern").
    fn source_name(&self) -> &str;
}

/// Scale a raw sample to volts (`raw / 1023 * 5`).
pub fn raw_to_voltage(raw: RawSample) -> f64 {
    f64::from(raw) / f64::from(defaults::ADC_MAX_RAW) * defaults::ADC_REFERENCE_VOLTS
}

/// Reject channels the converter does not have.
pub(crate) const fn check_channel(channel: u8) -> Result<(), AcquisitionError> {
    if channel < defaults::ADC_CHANNEL_COUNT {
        Ok(())
    } else {
        Err(AcquisitionError::InvalidChannel {
            channel,
            count: defaults::ADC_CHANNEL_COUNT,
        })
    }
}

/// Build the converter selected in the config.
///
/// `simulate` forces the test pattern regardless of `config.source`.
pub fn open_adc(config: &AdcConfig, simulate: bool) -> Result<Arc<dyn AnalogChannel>, AcquisitionError> {
    let source = if simulate { AdcSource::TestPattern } else { config.source };
    let adc: Arc<dyn AnalogChannel> = match source {
        AdcSource::Spi => Arc::new(Mcp3008::open(&config.spi_device, config.spi_speed_hz)?),
        AdcSource::TestPattern => Arc::new(TestPatternAdc::new(
            config.test_pattern_step,
            0,
            defaults::ADC_MAX_RAW,
        )),
    };
    tracing::info!(source = adc.source_name(), "ADC ready");
    Ok(adc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_to_voltage_endpoints() {
        assert_eq!(raw_to_voltage(0), 0.0);
        assert!((raw_to_voltage(1023) - 5.0).abs() < 1e-12);
        assert!((raw_to_voltage(511) - 2.497_556_207).abs() < 1e-9);
    }

    #[test]
    fn test_check_channel() {
        assert!(check_channel(7).is_ok());
        assert!(matches!(
            check_channel(8),
            Err(AcquisitionError::InvalidChannel { channel: 8, count: 8 })
        ));
    }

    #[test]
    fn test_open_adc_simulated() {
        let adc = open_adc(&AdcConfig::default(), true).unwrap();
        assert_eq!(adc.source_name(), "test-pattern");
        assert!(adc.read(0).unwrap() <= 1023);
    }

    #[test]
    fn test_open_adc_missing_device_is_an_error() {
        let config = AdcConfig {
            spi_device: "/nonexistent/spidev9.9".into(),
            ..AdcConfig::default()
        };
        assert!(matches!(open_adc(&config, false), Err(AcquisitionError::Open { .. })));
    }
}
