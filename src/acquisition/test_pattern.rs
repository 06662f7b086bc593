//! Simulated converter producing a triangle wave on every channel.
//!
//! Used on development machines and in tests so the whole acquisition path
//! runs without SPI hardware attached.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{check_channel, AcquisitionError, AnalogChannel, RawSample};
use crate::config::defaults;

const MIN_STEP: u16 = 1;
const MAX_STEP: u16 = 10;

/// Jitter added once to the base step at construction.
const JITTER: std::ops::RangeInclusive<u16> = 1..=3;

#[derive(Debug, Clone, Copy)]
struct Oscillator {
    value: i32,
    step: i32,
}

/// Deterministic oscillator reflecting between `min_value` and `max_value`.
pub struct TestPatternAdc {
    min_value: i32,
    max_value: i32,
    channels: Mutex<[Oscillator; defaults::ADC_CHANNEL_COUNT as usize]>,
}

impl TestPatternAdc {
    /// New oscillator with a randomly jittered step.
    pub fn new(step: u16, min_value: u16, max_value: u16) -> Self {
        Self::build(step, rand::thread_rng().gen_range(JITTER), min_value, max_value)
    }

    /// Same as [`new`](Self::new) with the jitter drawn from a seeded RNG.
    pub fn with_seed(step: u16, min_value: u16, max_value: u16, seed: u64) -> Self {
        let jitter = StdRng::seed_from_u64(seed).gen_range(JITTER);
        Self::build(step, jitter, min_value, max_value)
    }

    fn build(step: u16, jitter: u16, min_value: u16, max_value: u16) -> Self {
        let (lo, hi) = if min_value <= max_value {
            (min_value, max_value)
        } else {
            (max_value, min_value)
        };
        let lo = i32::from(lo.min(defaults::ADC_MAX_RAW));
        let hi = i32::from(hi.min(defaults::ADC_MAX_RAW));
        let step = i32::from(step.clamp(MIN_STEP, MAX_STEP) + jitter);

        Self {
            min_value: lo,
            max_value: hi,
            channels: Mutex::new(
                [Oscillator { value: lo, step }; defaults::ADC_CHANNEL_COUNT as usize],
            ),
        }
    }

    /// Effective step per read (base step plus jitter).
    pub fn step(&self) -> u16 {
        self.channels
            .lock()
            .map(|c| c[0].step.unsigned_abs() as u16)
            .unwrap_or(MIN_STEP)
    }
}

impl AnalogChannel for TestPatternAdc {
    fn read(&self, channel: u8) -> Result<RawSample, AcquisitionError> {
        check_channel(channel)?;
        // A poisoned lock only means another reader panicked mid-update;
        // the oscillator state is still a valid pair of integers.
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let osc = &mut channels[usize::from(channel)];

        let sample = osc.value;
        let mut next = osc.value + osc.step;
        if next > self.max_value {
            osc.step = -osc.step;
            next = (2 * self.max_value - next).max(self.min_value);
        } else if next < self.min_value {
            osc.step = -osc.step;
            next = (2 * self.min_value - next).min(self.max_value);
        }
        osc.value = next;

        Ok(sample as RawSample)
    }

    fn source_name(&self) -> &str {
        "test-pattern"
    }
}
