//! Type-K thermocouple behind a 0-5 V amplifier (`T = 250 * V`).

use serde::Serialize;
use std::sync::Arc;

use super::SensorError;
use crate::acquisition::{raw_to_voltage, AnalogChannel};
use crate::config::defaults;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperatureReading {
    /// Degrees Celsius. Not clamped; an out-of-range voltage yields an out-of-range value.
    pub temp: i32,
    pub volt: f64,
}

pub struct TemperatureSensor {
    adc: Arc<dyn AnalogChannel>,
    channel: u8,
}

impl TemperatureSensor {
    pub fn new(adc: Arc<dyn AnalogChannel>, channel: u8) -> Self {
        Self { adc, channel }
    }

    pub const fn channel(&self) -> u8 {
        self.channel
    }

    pub fn calculate_temp(voltage: f64) -> i32 {
        (defaults::DEGREES_PER_VOLT * voltage).floor() as i32
    }

    pub fn get_voltage(&self) -> Result<f64, SensorError> {
        Ok(raw_to_voltage(self.adc.read(self.channel)?))
    }

    pub fn get_data(&self) -> Result<TemperatureReading, SensorError> {
        let volt = self.get_voltage()?;
        Ok(TemperatureReading {
            temp: Self::calculate_temp(volt),
            volt,
        })
    }
}
