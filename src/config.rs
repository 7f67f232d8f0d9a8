//! Tuning parameters and the settings file.
//!
//! [`ScrollConfig`] is the immutable value the scaler reads. Its fields are private
//! and every constructor (including deserialization) clamps them into range, so an
//! out-of-range value can never reach the engine.
//!
//! [`Settings`] is the on-disk TOML document the binary loads. Missing tables and
//! fields fall back to defaults:
//!
//! ```toml
//! [scroll]
//! sensitivity = 1.6
//! acceleration = 0.55
//! velocity_reference = 24.0
//! max_boost = 2.0
//! invert = false
//!
//! [device]
//! vendor_id = 0x077d
//! product_ids = [0x0410, 0x04aa]
//! poll_interval_ms = 2
//! rescan_interval_ms = 1000
//!
//! [logging]
//! level = "info"
//! ansi = true
//! ```

use crate::device::DeviceFilter;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

pub const SENSITIVITY_RANGE: RangeInclusive<f64> = 0.2..=8.0;
pub const ACCELERATION_RANGE: RangeInclusive<f64> = 0.0..=1.5;
pub const VELOCITY_REFERENCE_RANGE: RangeInclusive<f64> = 5.0..=60.0;
pub const MAX_BOOST_RANGE: RangeInclusive<f64> = 0.0..=8.0;

const DEFAULT_SENSITIVITY: f64 = 1.6;
const DEFAULT_ACCELERATION: f64 = 0.55;
const DEFAULT_VELOCITY_REFERENCE: f64 = 24.0;
const DEFAULT_MAX_BOOST: f64 = 2.0;

/// Response-curve parameters, always within range.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "ScrollConfigFields", into = "ScrollConfigFields")]
pub struct ScrollConfig {
    sensitivity: f64,
    acceleration: f64,
    velocity_reference: f64,
    max_boost: f64,
    invert: bool,
}

/// Wire shape of [`ScrollConfig`]; clamped on the way in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
struct ScrollConfigFields {
    sensitivity: f64,
    acceleration: f64,
    velocity_reference: f64,
    max_boost: f64,
    invert: bool,
}

impl Default for ScrollConfigFields {
    fn default() -> Self {
        ScrollConfig::default().into()
    }
}

impl From<ScrollConfigFields> for ScrollConfig {
    fn from(f: ScrollConfigFields) -> Self {
        ScrollConfig::new(
            f.sensitivity,
            f.acceleration,
            f.velocity_reference,
            f.max_boost,
            f.invert,
        )
    }
}

impl From<ScrollConfig> for ScrollConfigFields {
    fn from(c: ScrollConfig) -> Self {
        Self {
            sensitivity: c.sensitivity,
            acceleration: c.acceleration,
            velocity_reference: c.velocity_reference,
            max_boost: c.max_boost,
            invert: c.invert,
        }
    }
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
            acceleration: DEFAULT_ACCELERATION,
            velocity_reference: DEFAULT_VELOCITY_REFERENCE,
            max_boost: DEFAULT_MAX_BOOST,
            invert: false,
        }
    }
}

/// Clamp into `range`; non-finite input falls back to `default`.
fn clamp_field(value: f64, range: &RangeInclusive<f64>, default: f64) -> f64 {
    if value.is_finite() {
        value.clamp(*range.start(), *range.end())
    } else {
        default
    }
}

impl ScrollConfig {
    /// Build a config, clamping every numeric field into its range.
    pub fn new(
        sensitivity: f64,
        acceleration: f64,
        velocity_reference: f64,
        max_boost: f64,
        invert: bool,
    ) -> Self {
        Self {
            sensitivity: clamp_field(sensitivity, &SENSITIVITY_RANGE, DEFAULT_SENSITIVITY),
            acceleration: clamp_field(acceleration, &ACCELERATION_RANGE, DEFAULT_ACCELERATION),
            velocity_reference: clamp_field(
                velocity_reference,
                &VELOCITY_REFERENCE_RANGE,
                DEFAULT_VELOCITY_REFERENCE,
            ),
            max_boost: clamp_field(max_boost, &MAX_BOOST_RANGE, DEFAULT_MAX_BOOST),
            invert,
        }
    }

    #[inline]
    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    #[inline]
    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    #[inline]
    pub fn velocity_reference(&self) -> f64 {
        self.velocity_reference
    }

    #[inline]
    pub fn max_boost(&self) -> f64 {
        self.max_boost
    }

    #[inline]
    pub fn invert(&self) -> bool {
        self.invert
    }

    pub fn with_invert(self, invert: bool) -> Self {
        Self { invert, ..self }
    }

    /// Return a copy with one named tunable replaced.
    ///
    /// Field names match the settings file (`velocity_reference`, `max_boost`, ...).
    /// Numeric values are clamped like every other constructor.
    pub fn apply(self, field: &str, value: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        };
        let mut f = ScrollConfigFields::from(self);
        match field {
            "invert" => f.invert = value.parse().map_err(|_| invalid())?,
            "sensitivity" | "acceleration" | "velocity_reference" | "max_boost" => {
                let v: f64 = value.parse().map_err(|_| invalid())?;
                if !v.is_finite() {
                    return Err(invalid());
                }
                match field {
                    "sensitivity" => f.sensitivity = v,
                    "acceleration" => f.acceleration = v,
                    "velocity_reference" => f.velocity_reference = v,
                    _ => f.max_boost = v,
                }
            }
            other => return Err(ConfigError::UnknownField(other.to_string())),
        }
        Ok(f.into())
    }
}

/// `[device]` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub vendor_id: u16,
    pub product_ids: [u16; 2],
    /// Event pump period while at least one dial is registered.
    pub poll_interval_ms: u64,
    /// Hotplug rescan period; also the pump period while idle.
    pub rescan_interval_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        let filter = DeviceFilter::default();
        Self {
            vendor_id: filter.vendor_id,
            product_ids: filter.product_ids,
            poll_interval_ms: 2,
            rescan_interval_ms: 1000,
        }
    }
}

impl DeviceSettings {
    pub fn filter(&self) -> DeviceFilter {
        DeviceFilter {
            vendor_id: self.vendor_id,
            product_ids: self.product_ids,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms.max(1))
    }
}

/// `[logging]` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

/// The whole settings document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scroll: ScrollConfig,
    pub device: DeviceSettings,
    pub logging: LoggingConfig,
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}
