//! Wideband lambda sensor.
//!
//! The controller outputs 0-5 V linear in lambda:
//!
//! ```text
//! lambda = round(0.2 * V + correction, 3)
//! afr    = lambda * afr_stoch
//! ```

use serde::Serialize;
use std::sync::Arc;

use super::SensorError;
use crate::acquisition::{raw_to_voltage, AnalogChannel};
use crate::config::{defaults, Bank, ConfigFault, ConfigKey, LiveConfig};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LambdaReading {
    pub lambda: f64,
    pub afr: f64,
    pub volt: f64,
}

pub struct LambdaSensor {
    adc: Arc<dyn AnalogChannel>,
    channel: u8,
    bank: Bank,
    config: LiveConfig,
}

impl LambdaSensor {
    pub fn new(adc: Arc<dyn AnalogChannel>, channel: u8, bank: Bank, config: LiveConfig) -> Self {
        Self {
            adc,
            channel,
            bank,
            config,
        }
    }

    pub const fn bank(&self) -> Bank {
        self.bank
    }

    pub const fn channel(&self) -> u8 {
        self.channel
    }

    /// Lambda from a voltage and a calibration offset, rounded to 3 decimals.
    pub fn calculate_lambda(voltage: f64, correction: f64) -> f64 {
        round_to(defaults::LAMBDA_PER_VOLT * voltage + correction, 3)
    }

    /// Absolute AFR for `lambda` with the configured stoichiometric ratio.
    pub fn get_afr(&self, lambda: f64) -> Result<f64, ConfigFault> {
        let afr_stoch = self.config.snapshot().value(ConfigKey::AfrStoch)?;
        Ok(lambda * afr_stoch)
    }

    pub fn get_voltage(&self) -> Result<f64, SensorError> {
        Ok(raw_to_voltage(self.adc.read(self.channel)?))
    }

    pub fn get_data(&self) -> Result<LambdaReading, SensorError> {
        let volt = self.get_voltage()?;
        let correction = self.config.snapshot().correction(self.bank)?;
        let lambda = Self::calculate_lambda(volt, correction);
        let afr = self.get_afr(lambda)?;
        Ok(LambdaReading { lambda, afr, volt })
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
