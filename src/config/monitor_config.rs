//! Monitor Configuration - calibration, channel map and timing as TOML values
//!
//! Every value the acquisition cycles consume is a field in this module.
//! Each struct implements `Default` with the historical settings, so the
//! system behaves identically when no config file is present.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "EXHAUST_MONITOR_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "monitor_config.toml";

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading or serializing the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no config file to reload")]
    NoSource,
}

/// A configuration value the acquisition cycle cannot work with.
///
/// Raised at the moment a value is read, not at load time, so a bad edit
/// surfaces as a `config` error event on the dashboard.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigFault {
    #[error("{key} must be a finite number, got {value}")]
    NotFinite { key: ConfigKey, value: f64 },

    #[error("{key} must be greater than zero, got {value}")]
    NotPositive { key: ConfigKey, value: f64 },

    #[error(
        "{} / {} gives {samples} reads per averaging window, at most {limit} are allowed",
        ConfigKey::UpdateInterval,
        ConfigKey::SamplingInterval
    )]
    WindowTooLarge { samples: f64, limit: usize },

    #[error("{sensor} is assigned to ADC channel {channel}, valid channels are 0..{limit}")]
    ChannelOutOfRange {
        sensor: &'static str,
        channel: u8,
        limit: u8,
    },
}

// ============================================================================
// Typed keys
// ============================================================================

/// Scalar settings the sensors and the broadcast loop look up at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    AfrStoch,
    CorrectionBank1,
    CorrectionBank2,
    UpdateInterval,
    SamplingInterval,
}

impl ConfigKey {
    /// Dotted TOML path of the key.
    pub const fn path(self) -> &'static str {
        match self {
            Self::AfrStoch => "lambda.afr_stoch",
            Self::CorrectionBank1 => "lambda.correction_bank_1",
            Self::CorrectionBank2 => "lambda.correction_bank_2",
            Self::UpdateInterval => "timing.update_interval_secs",
            Self::SamplingInterval => "timing.sampling_interval_secs",
        }
    }

    /// Whether the value must be strictly positive (calibration offsets may be negative).
    const fn requires_positive(self) -> bool {
        !matches!(self, Self::CorrectionBank1 | Self::CorrectionBank2)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Exhaust bank a lambda sensor is mounted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bank {
    Bank1,
    Bank2,
}

impl Bank {
    /// The calibration key for this bank.
    pub const fn correction_key(self) -> ConfigKey {
        match self {
            Self::Bank1 => ConfigKey::CorrectionBank1,
            Self::Bank2 => ConfigKey::CorrectionBank2,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Bank1 => "lambda bank 1",
            Self::Bank2 => "lambda bank 2",
        }
    }
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `MonitorConfig::load()` which searches:
/// 1. `$EXHAUST_MONITOR_CONFIG` env var
/// 2. `./monitor_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Wideband lambda calibration and channel map
    #[serde(default)]
    pub lambda: LambdaConfig,

    /// Thermocouple channel map
    #[serde(default)]
    pub temperature: TemperatureConfig,

    /// Sampling and broadcast cadence
    #[serde(default)]
    pub timing: TimingConfig,

    /// ADC transport selection
    #[serde(default)]
    pub adc: AdcConfig,

    /// Embedded database location and retention
    #[serde(default)]
    pub storage: StorageConfig,

    /// HTTP / WebSocket server
    #[serde(default)]
    pub server: ServerConfig,
}

impl MonitorConfig {
    /// Path of the config file using the standard search order, if any exists.
    pub fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                return Some(p);
            }
            warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        local.exists().then_some(local)
    }

    /// Load configuration using the standard search order.
    ///
    /// Returns the config together with the file it came from, so the
    /// watcher knows what to poll.
    pub fn load() -> (Self, Option<PathBuf>) {
        if let Some(path) = Self::locate() {
            match Self::load_from_file(&path) {
                Ok(config) => {
                    info!(path = %path.display(), "Loaded monitor config");
                    for w in config.validation_warnings() {
                        warn!("{}", w);
                    }
                    return (config, Some(path));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load monitor config, using defaults");
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        (Self::default(), None)
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Raw value of a typed key.
    pub const fn raw_value(&self, key: ConfigKey) -> f64 {
        match key {
            ConfigKey::AfrStoch => self.lambda.afr_stoch,
            ConfigKey::CorrectionBank1 => self.lambda.correction_bank_1,
            ConfigKey::CorrectionBank2 => self.lambda.correction_bank_2,
            ConfigKey::UpdateInterval => self.timing.update_interval_secs,
            ConfigKey::SamplingInterval => self.timing.sampling_interval_secs,
        }
    }

    /// Value of a typed key, checked for usability.
    pub fn value(&self, key: ConfigKey) -> Result<f64, ConfigFault> {
        let value = self.raw_value(key);
        if !value.is_finite() {
            return Err(ConfigFault::NotFinite { key, value });
        }
        if key.requires_positive() && value <= 0.0 {
            return Err(ConfigFault::NotPositive { key, value });
        }
        Ok(value)
    }

    /// Calibration offset for a bank.
    pub fn correction(&self, bank: Bank) -> Result<f64, ConfigFault> {
        self.value(bank.correction_key())
    }

    /// ADC channel of the lambda sensor on `bank`.
    pub const fn lambda_channel(&self, bank: Bank) -> u8 {
        match bank {
            Bank::Bank1 => self.lambda.channel_bank_1,
            Bank::Bank2 => self.lambda.channel_bank_2,
        }
    }

    /// ADC channel of thermocouple `sensor_id` (0 or 1).
    pub const fn temperature_channel(&self, sensor_id: u8) -> u8 {
        if sensor_id == 0 {
            self.temperature.channel_sensor_0
        } else {
            self.temperature.channel_sensor_1
        }
    }

    /// Problems that would fault the broadcast loop, reported at load time.
    ///
    /// Loading never rejects these; the loop raises them when it reads the
    /// values so the dashboard can show what is wrong.
    pub fn validation_warnings(&self) -> Vec<String> {
        let keys = [
            ConfigKey::AfrStoch,
            ConfigKey::CorrectionBank1,
            ConfigKey::CorrectionBank2,
            ConfigKey::UpdateInterval,
            ConfigKey::SamplingInterval,
        ];
        let mut warnings: Vec<String> = keys
            .into_iter()
            .filter_map(|k| self.value(k).err())
            .map(|fault| fault.to_string())
            .collect();

        for (sensor, channel) in self.channel_map() {
            if channel >= defaults::ADC_CHANNEL_COUNT {
                warnings.push(
                    ConfigFault::ChannelOutOfRange {
                        sensor,
                        channel,
                        limit: defaults::ADC_CHANNEL_COUNT,
                    }
                    .to_string(),
                );
            }
        }

        if let (Ok(update), Ok(sampling)) = (
            self.value(ConfigKey::UpdateInterval),
            self.value(ConfigKey::SamplingInterval),
        ) {
            let samples = (update / sampling).round();
            if samples < 1.0 {
                warnings.push(format!(
                    "{} ({}) is longer than {} ({}); averaging falls back to a single sample",
                    ConfigKey::SamplingInterval,
                    sampling,
                    ConfigKey::UpdateInterval,
                    update
                ));
            } else if samples > defaults::MAX_SAMPLES_PER_WINDOW as f64 {
                warnings.push(
                    ConfigFault::WindowTooLarge {
                        samples,
                        limit: defaults::MAX_SAMPLES_PER_WINDOW,
                    }
                    .to_string(),
                );
            }
        }

        warnings
    }

    /// All four sensor channel assignments, labelled.
    pub const fn channel_map(&self) -> [(&'static str, u8); 4] {
        [
            (Bank::Bank1.label(), self.lambda.channel_bank_1),
            (Bank::Bank2.label(), self.lambda.channel_bank_2),
            ("temperature sensor 0", self.temperature.channel_sensor_0),
            ("temperature sensor 1", self.temperature.channel_sensor_1),
        ]
    }

    /// Dotted-key view of every value, used to report hot-reload diffs.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if let Ok(value) = toml::Value::try_from(self) {
            flatten_into(&value, "", &mut out);
        }
        out
    }
}

fn flatten_into(value: &toml::Value, prefix: &str, out: &mut BTreeMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_into(v, &key, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Wideband lambda sensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaConfig {
    /// Stoichiometric AFR of the fuel (14.68 for pump gasoline).
    #[serde(default = "default_afr_stoch")]
    pub afr_stoch: f64,

    /// Calibration offset for bank 1.
    #[serde(default = "default_correction")]
    pub correction_bank_1: f64,

    /// Calibration offset for bank 2.
    #[serde(default = "default_correction")]
    pub correction_bank_2: f64,

    #[serde(default)]
    pub channel_bank_1: u8,

    #[serde(default = "default_channel_bank_2")]
    pub channel_bank_2: u8,
}

const fn default_afr_stoch() -> f64 {
    defaults::AFR_STOCH
}

const fn default_correction() -> f64 {
    defaults::CORRECTION_FACTOR
}

const fn default_channel_bank_2() -> u8 {
    1
}

impl Default for LambdaConfig {
    fn default() -> Self {
        Self {
            afr_stoch: default_afr_stoch(),
            correction_bank_1: default_correction(),
            correction_bank_2: default_correction(),
            channel_bank_1: 0,
            channel_bank_2: default_channel_bank_2(),
        }
    }
}

/// Type-K thermocouple amplifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureConfig {
    #[serde(default = "default_channel_sensor_0")]
    pub channel_sensor_0: u8,

    #[serde(default = "default_channel_sensor_1")]
    pub channel_sensor_1: u8,
}

const fn default_channel_sensor_0() -> u8 {
    2
}

const fn default_channel_sensor_1() -> u8 {
    3
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            channel_sensor_0: default_channel_sensor_0(),
            channel_sensor_1: default_channel_sensor_1(),
        }
    }
}

/// Acquisition cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Seconds between individual raw reads inside one averaged sample.
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval_secs: f64,

    /// Seconds between broadcast cycles.
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: f64,
}

const fn default_sampling_interval() -> f64 {
    defaults::SAMPLING_INTERVAL_SECS
}

const fn default_update_interval() -> f64 {
    defaults::UPDATE_INTERVAL_SECS
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sampling_interval_secs: default_sampling_interval(),
            update_interval_secs: default_update_interval(),
        }
    }
}

/// Where raw samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdcSource {
    /// MCP3008 on the SPI bus.
    #[default]
    Spi,
    /// Deterministic triangle-wave oscillator, no hardware required.
    TestPattern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdcConfig {
    #[serde(default)]
    pub source: AdcSource,

    /// spidev node of the converter.
    #[serde(default = "default_spi_device")]
    pub spi_device: PathBuf,

    #[serde(default = "default_spi_speed")]
    pub spi_speed_hz: u32,

    /// Base step of the simulated oscillator (clamped to 1..=10).
    #[serde(default = "default_test_pattern_step")]
    pub test_pattern_step: u16,
}

fn default_spi_device() -> PathBuf {
    PathBuf::from(defaults::SPI_DEVICE_PATH)
}

const fn default_spi_speed() -> u32 {
    defaults::SPI_MAX_SPEED_HZ
}

const fn default_test_pattern_step() -> u16 {
    1
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            source: AdcSource::default(),
            spi_device: default_spi_device(),
            spi_speed_hz: default_spi_speed(),
            test_pattern_step: default_test_pattern_step(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// History samples older than this many days are pruned at startup.
    #[serde(default = "default_retention_days")]
    pub history_retention_days: i64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}

const fn default_retention_days() -> i64 {
    defaults::HISTORY_RETENTION_DAYS
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            history_retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server bind address.
    ///
    /// Can be overridden by `EXHAUST_MONITOR_ADDR` env var or `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,

    /// Set the system clock from the browser time sent with `connected`.
    ///
    /// The Pi has no RTC; enable this on deployments without NTP.
    #[serde(default)]
    pub clock_sync: bool,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            clock_sync: false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
