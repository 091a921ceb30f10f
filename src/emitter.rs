//! Observation emitter: publishes decoded readings as metrics and renders the
//! operator log lines.

use crate::advertisement::RawAdvertisement;
use crate::metrics::Metrics;
use crate::reading::SensorReading;

/// Writes per-device series for recognised readings.
#[derive(Clone)]
pub struct Emitter {
    metrics: Metrics,
}

impl Emitter {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Publish `reading` for the device that sent `advertisement`.
    ///
    /// Only measurements present in the reading touch their gauge; an absent
    /// value leaves whatever was published before. Readings with an unknown
    /// model publish nothing. Returns whether anything was published.
    pub fn publish(
        &self,
        advertisement: &RawAdvertisement,
        name: &str,
        reading: &SensorReading,
        now_unix_seconds: u64,
    ) -> bool {
        if !reading.model.is_recognized() {
            return false;
        }

        let mac = advertisement.address.to_string();
        let labels = [mac.as_str(), name, reading.model.as_str()];
        let m = &self.metrics;

        macro_rules! set_present {
            ($gauge:expr, $value:expr) => {
                if let Some(v) = $value {
                    $gauge.with_label_values(&labels).set(v);
                }
            };
        }

        set_present!(m.device_temperature, reading.temperature_celsius);
        set_present!(m.device_humidity, reading.humidity_percent);
        set_present!(m.device_battery, reading.battery_percent);

        m.device_advertisement_count.with_label_values(&labels).inc();
        m.device_signal
            .with_label_values(&labels)
            .set(f64::from(advertisement.rssi));
        m.device_last_seen
            .with_label_values(&labels)
            .set(now_unix_seconds as f64);
        m.advertisement_supported_count.inc();

        true
    }
}

/// Log line for a decoded reading from a supported sensor.
///
/// Absent measurements print as [`ABSENT`](crate::reading::ABSENT).
pub fn describe_reading(
    advertisement: &RawAdvertisement,
    name: &str,
    reading: &SensorReading,
) -> String {
    format!(
        "[{}] Name: {} RSSI:{:3} Temp:{:.1} Humidity:{:.1} Batt:{:.1} ModelID:0x{:04x}, ID:{} Type:{} [{} {}]",
        advertisement.address,
        name,
        advertisement.rssi,
        reading.temperature_or_absent(),
        reading.humidity_or_absent(),
        reading.battery_or_absent(),
        reading.model_id,
        reading.sequence_id,
        reading.frame_type,
        advertisement.connectable_label(),
        reading.model,
    )
}

/// Log line for an advertisement nothing could be decoded from.
pub fn describe_raw(advertisement: &RawAdvertisement, reading: &SensorReading) -> String {
    format!(
        "[{}] Name: {} RSSI:{:3} Data: {} [{}] [{} {}]",
        advertisement.address,
        advertisement.local_name.as_deref().unwrap_or(""),
        advertisement.rssi,
        hex::encode(&advertisement.data),
        advertisement.data.len(),
        advertisement.connectable_label(),
        reading.model,
    )
}
