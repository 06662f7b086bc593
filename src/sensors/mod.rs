//! Sensor conversion layer
//!
//! Turns raw converter samples into engineering units:
//! - [`LambdaSensor`]: wideband lambda and AFR per exhaust bank
//! - [`TemperatureSensor`]: type-K thermocouple temperature
//!
//! Sensors never cache. Calibration is read from the live config on every
//! `get_data()` call and a read failure propagates to the caller unchanged.

mod lambda;
mod temperature;

pub use lambda::{LambdaReading, LambdaSensor};
pub use temperature::{TemperatureReading, TemperatureSensor};

use std::sync::Arc;
use thiserror::Error;

use crate::acquisition::{AcquisitionError, AnalogChannel};
use crate::config::{defaults, Bank, ConfigFault, LiveConfig};

/// Failure while producing a reading.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Config(#[from] ConfigFault),
}

/// Latest reading of both thermocouples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperaturePair {
    pub sensor_0: TemperatureReading,
    pub sensor_1: TemperatureReading,
}

impl TemperaturePair {
    /// Readings indexed by sensor id.
    pub const fn by_id(&self) -> [(u8, TemperatureReading); 2] {
        [(0, self.sensor_0), (1, self.sensor_1)]
    }
}

/// The converter plus the live config, from which every sensor is built.
///
/// Cheap to clone; each background cycle holds its own copy.
#[derive(Clone)]
pub struct SensorSet {
    adc: Arc<dyn AnalogChannel>,
    config: LiveConfig,
}

impl SensorSet {
    pub fn new(adc: Arc<dyn AnalogChannel>, config: LiveConfig) -> Self {
        Self { adc, config }
    }

    pub const fn config(&self) -> &LiveConfig {
        &self.config
    }

    /// Lambda sensor on `bank`, bound to the channel currently configured for it.
    pub fn lambda(&self, bank: Bank) -> Result<LambdaSensor, ConfigFault> {
        let channel = self.config.snapshot().lambda_channel(bank);
        let channel = checked_channel(bank.label(), channel)?;
        Ok(LambdaSensor::new(Arc::clone(&self.adc), channel, bank, self.config.clone()))
    }

    /// Thermocouple `sensor_id` (0 or 1).
    pub fn temperature(&self, sensor_id: u8) -> Result<TemperatureSensor, ConfigFault> {
        let channel = self.config.snapshot().temperature_channel(sensor_id);
        let label = if sensor_id == 0 {
            "temperature sensor 0"
        } else {
            "temperature sensor 1"
        };
        let channel = checked_channel(label, channel)?;
        Ok(TemperatureSensor::new(Arc::clone(&self.adc), channel))
    }

    /// Read both thermocouples once.
    pub fn read_temperatures(&self) -> Result<TemperaturePair, SensorError> {
        Ok(TemperaturePair {
            sensor_0: self.temperature(0)?.get_data()?,
            sensor_1: self.temperature(1)?.get_data()?,
        })
    }
}

fn checked_channel(sensor: &'static str, channel: u8) -> Result<u8, ConfigFault> {
    if channel < defaults::ADC_CHANNEL_COUNT {
        Ok(channel)
    } else {
        Err(ConfigFault::ChannelOutOfRange {
            sensor,
            channel,
            limit: defaults::ADC_CHANNEL_COUNT,
        })
    }
}
