//! System-wide default constants.
//!
//! Centralises the magic numbers of the acquisition and monitoring cycles.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// ADC
// ============================================================================

/// Full-scale raw value of the 10-bit converter.
pub const ADC_MAX_RAW: u16 = 1023;

/// Reference voltage the raw value is scaled against (V).
pub const ADC_REFERENCE_VOLTS: f64 = 5.0;

/// Number of single-ended inputs on the converter.
pub const ADC_CHANNEL_COUNT: u8 = 8;

/// SPI clock for the converter (Hz).
pub const SPI_MAX_SPEED_HZ: u32 = 1_000_000;

/// Default spidev node (bus 0, chip select 0).
pub const SPI_DEVICE_PATH: &str = "/dev/spidev0.0";

// ============================================================================
// Lambda
// ============================================================================

/// Stoichiometric air-fuel ratio of the fuel in use.
pub const AFR_STOCH: f64 = 14.68;

/// Calibration offset applied to both banks unless configured otherwise.
pub const CORRECTION_FACTOR: f64 = 0.511;

/// Slope of the wideband controller's linear output (lambda per volt).
pub const LAMBDA_PER_VOLT: f64 = 0.2;

// ============================================================================
// Temperature
// ============================================================================

/// Thermocouple amplifier transfer function (°C per volt).
pub const DEGREES_PER_VOLT: f64 = 250.0;

/// Readings above this are "hot": logged to history and counted as runtime (°C).
pub const HOT_THRESHOLD_C: i32 = 100;

/// Readings above this count towards the overheat grace window (°C).
pub const OVERHEAT_THRESHOLD_C: i32 = 1100;

// ============================================================================
// Timing
// ============================================================================

/// Time between raw reads used to build one averaged sample (seconds).
pub const SAMPLING_INTERVAL_SECS: f64 = 0.01;

/// Time between broadcast cycles delivered to clients (seconds).
pub const UPDATE_INTERVAL_SECS: f64 = 1.5;

/// Upper bound on `round(update / sampling)`, the reads averaged per cycle.
pub const MAX_SAMPLES_PER_WINDOW: usize = 10_000;

// ============================================================================
// Monitors
// ============================================================================

/// LifetimeTracker cycle period (seconds).
pub const LIFETIME_CYCLE_SECS: u64 = 60;

/// Runtime after which a thermocouple is due for replacement (minutes).
///
/// 6 000 = 100 hours.
pub const SENSOR_LIFETIME_MINUTES: u64 = 6_000;

/// OverheatDetector cycle period (seconds).
pub const OVERHEAT_CYCLE_SECS: u64 = 2;

/// Accumulated over-threshold time that trips the overheat alarm (seconds).
///
/// Compared with `>`, so two consecutive 2 s cycles are required.
pub const OVERHEAT_GRACE_SECS: u64 = 2;

/// ErrorNotifier cycle period (seconds).
pub const NOTIFIER_CYCLE_SECS: u64 = 30;

// ============================================================================
// Storage
// ============================================================================

/// Default data directory.
pub const DATA_DIR: &str = "./data";

/// History samples older than this are pruned at startup (days).
pub const HISTORY_RETENTION_DAYS: i64 = 30;

/// Thermocouple ids that get a tracking row at initialization.
pub const TRACKED_SENSOR_IDS: [u8; 2] = [0, 1];

// ============================================================================
// Server
// ============================================================================

/// HTTP server bind address.
pub const SERVER_ADDR: &str = "0.0.0.0:8080";

/// Capacity of the outbound event fan-out channel (frames).
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
