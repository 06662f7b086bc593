//! Lambda sample averaging.
//!
//! Each broadcast cycle reads both lambda banks `n` times, `sampling_interval`
//! apart, and reports the per-field arithmetic mean. The sleep between reads
//! is a real yield point, so other cycles and client I/O interleave.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::sensors::{LambdaReading, LambdaSensor, SensorError};

#[derive(Debug, Error)]
pub enum AveragingError {
    #[error("averaging window is empty (sampling interval longer than update interval)")]
    DegenerateSampleCount,

    #[error(transparent)]
    Sensor(#[from] SensorError),
}

/// Mean readings of both banks over one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AveragedSample {
    pub bank_1: LambdaReading,
    pub bank_2: LambdaReading,
    /// Readings per bank that went into the means.
    pub samples: usize,
}

/// Read both sensors `n` times and average each field.
pub async fn average(
    bank_1: &LambdaSensor,
    bank_2: &LambdaSensor,
    n: usize,
    sampling_interval: Duration,
) -> Result<AveragedSample, AveragingError> {
    if n == 0 {
        return Err(AveragingError::DegenerateSampleCount);
    }

    let mut first = ReadingSum::default();
    let mut second = ReadingSum::default();
    for _ in 0..n {
        first.add(&bank_1.get_data()?);
        second.add(&bank_2.get_data()?);
        tokio::time::sleep(sampling_interval).await;
    }

    match (first.mean(), second.mean()) {
        (Some(bank_1), Some(bank_2)) => Ok(AveragedSample {
            bank_1,
            bank_2,
            samples: n,
        }),
        _ => Err(AveragingError::DegenerateSampleCount),
    }
}

/// Field-wise running sum of lambda readings.
#[derive(Debug, Default, Clone, Copy)]
struct ReadingSum {
    lambda: f64,
    afr: f64,
    volt: f64,
    count: usize,
}

impl ReadingSum {
    fn add(&mut self, reading: &LambdaReading) {
        self.lambda += reading.lambda;
        self.afr += reading.afr;
        self.volt += reading.volt;
        self.count += 1;
    }

    fn mean(&self) -> Option<LambdaReading> {
        if self.count == 0 {
            return None;
        }
        let count = self.count as f64;
        Some(LambdaReading {
            lambda: self.lambda / count,
            afr: self.afr / count,
            volt: self.volt / count,
        })
    }
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Field-wise mean of lambda readings.
pub fn mean_reading(readings: &[LambdaReading]) -> Option<LambdaReading> {
    let mut sum = ReadingSum::default();
    readings.iter().for_each(|r| sum.add(r));
    sum.mean()
}
