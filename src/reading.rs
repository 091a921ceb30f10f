//! Decoded sensor reading.

use std::fmt;

/// Value printed for a measurement the advertisement did not carry.
///
/// Only the human-readable log line uses it; metrics skip absent fields.
pub const ABSENT: f64 = -99.9;

/// Sensor family a payload was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SensorModel {
    /// No decoder recognised the payload
    #[default]
    Unknown,
    /// MiBeacon envelope from a product id this exporter does not know
    Error,
    /// Xiaomi Mijia LYWSDCGQ (product id 0x01AA)
    Lywsdcgq,
    /// Recognised Xiaomi product whose readings are not decoded (LYWSD02)
    Unsupported,
    /// ATC custom firmware advertising format
    Atc,
}

impl SensorModel {
    /// Label value used in metrics and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorModel::Unknown => "Unknown",
            SensorModel::Error => "Error",
            SensorModel::Lywsdcgq => "LYWSDCGQ",
            SensorModel::Unsupported => "Unsupported",
            SensorModel::Atc => "ATC",
        }
    }

    /// A decoder matched, so per-device metrics are published.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, SensorModel::Unknown)
    }

    /// Readings from this model are decoded for real.
    pub fn is_supported(&self) -> bool {
        matches!(self, SensorModel::Lywsdcgq | SensorModel::Atc)
    }
}

impl fmt::Display for SensorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of decoding one advertisement.
///
/// `model_id` and `frame_type` are only meaningful for the Xiaomi family.
/// `sequence_id` is the rolling packet counter of whichever family matched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorReading {
    pub model: SensorModel,
    pub model_id: u16,
    pub frame_type: u8,
    pub sequence_id: u8,
    /// Temperature in Celsius
    pub temperature_celsius: Option<f64>,
    /// Relative humidity in percent (0-100)
    pub humidity_percent: Option<f64>,
    /// Battery level in percent (0-100)
    pub battery_percent: Option<f64>,
}

impl SensorReading {
    pub fn temperature_or_absent(&self) -> f64 {
        self.temperature_celsius.unwrap_or(ABSENT)
    }

    pub fn humidity_or_absent(&self) -> f64 {
        self.humidity_percent.unwrap_or(ABSENT)
    }

    pub fn battery_or_absent(&self) -> f64 {
        self.battery_percent.unwrap_or(ABSENT)
    }
}
