//! Xiaomi MiBeacon decoder.
//!
//! MiBeacon service data (UUID 0xFE95) layout, offsets into the AD payload:
//!
//! | offset | field                                   |
//! |--------|-----------------------------------------|
//! | 0-1    | service UUID `95 FE`                    |
//! | 2-3    | frame control                           |
//! | 4-5    | product id, little-endian               |
//! | 6      | frame counter                           |
//! | 7-12   | device MAC, reversed                    |
//! | 13     | object type (low byte)                  |
//! | 14     | object type (high byte, always 0x10)    |
//! | 15     | object length                           |
//! | 16..   | object value, little-endian             |
//!
//! The same object type is sent with and without a trailing battery byte, so
//! the total AD length decides where the battery sits.
//! See <https://github.com/tsymbaliuk/Xiaomi-Thermostat-BLE>.

use super::{VendorDecoder, tenths};
use crate::envelope::AdvertisingElement;
use crate::reading::{SensorModel, SensorReading};

pub const SIGNATURE: [u8; 2] = [0x95, 0xFE];
pub const MIN_LENGTH: u8 = 18;

/// Mijia Bluetooth Temperature and Humidity sensor
pub const PRODUCT_LYWSDCGQ: u16 = 0x01AA;
/// Mijia e-ink clock, readings not decoded
pub const PRODUCT_LYWSD02: u16 = 0x045B;

pub const FRAME_TEMPERATURE: u8 = 0x04;
pub const FRAME_HUMIDITY: u8 = 0x06;
pub const FRAME_BATTERY: u8 = 0x0A;
pub const FRAME_TEMPERATURE_HUMIDITY: u8 = 0x0D;

const VALUE_OFFSET: usize = 16;

pub const DECODER: VendorDecoder = VendorDecoder {
    name: "xiaomi",
    signature: SIGNATURE,
    min_length: MIN_LENGTH,
    decode,
};

fn tenths_at(data: &[u8], at: usize) -> Option<f64> {
    let bytes = data.get(at..at + 2)?;
    Some(tenths(i16::from_le_bytes([bytes[0], bytes[1]])))
}

fn percent_at(data: &[u8], at: usize) -> Option<f64> {
    data.get(at).copied().map(f64::from)
}

/// Decode a MiBeacon element.
///
/// The product id picks the model; the (object type, object length, AD
/// length) triple picks which measurements are present. Combinations not in
/// the table leave every measurement absent.
pub fn decode(element: &AdvertisingElement<'_>) -> SensorReading {
    let data = element.data;
    let mut reading = SensorReading {
        model: SensorModel::Error,
        ..Default::default()
    };

    let &[_, _, _, _, id_lo, id_hi, sequence, _, _, _, _, _, _, frame_type, _, object_len, ..] =
        data
    else {
        return reading;
    };

    reading.model_id = u16::from_le_bytes([id_lo, id_hi]);
    reading.sequence_id = sequence;
    reading.frame_type = frame_type;
    reading.model = match reading.model_id {
        PRODUCT_LYWSDCGQ => SensorModel::Lywsdcgq,
        PRODUCT_LYWSD02 => SensorModel::Unsupported,
        _ => SensorModel::Error,
    };

    match (frame_type, object_len, element.length) {
        (FRAME_TEMPERATURE_HUMIDITY, 4, 21) => {
            reading.temperature_celsius = tenths_at(data, VALUE_OFFSET);
            reading.humidity_percent = tenths_at(data, VALUE_OFFSET + 2);
        }
        (FRAME_TEMPERATURE_HUMIDITY, 4, 25) => {
            reading.temperature_celsius = tenths_at(data, VALUE_OFFSET);
            reading.humidity_percent = tenths_at(data, VALUE_OFFSET + 2);
            reading.battery_percent = percent_at(data, 23);
        }
        (FRAME_BATTERY, 1, 18) => {
            reading.battery_percent = percent_at(data, VALUE_OFFSET);
        }
        (FRAME_HUMIDITY, 2, 19) => {
            reading.humidity_percent = tenths_at(data, VALUE_OFFSET);
        }
        (FRAME_HUMIDITY, 2, 23) => {
            reading.humidity_percent = tenths_at(data, VALUE_OFFSET);
            reading.battery_percent = percent_at(data, 21);
        }
        (FRAME_TEMPERATURE, 2, 19) => {
            reading.temperature_celsius = tenths_at(data, VALUE_OFFSET);
        }
        (FRAME_TEMPERATURE, 2, 23) => {
            reading.temperature_celsius = tenths_at(data, VALUE_OFFSET);
            reading.battery_percent = percent_at(data, 21);
        }
        _ => {}
    }

    reading
}
