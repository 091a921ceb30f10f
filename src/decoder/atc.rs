//! ATC custom firmware decoder.
//!
//! The atc1441 firmware for Xiaomi LYWSD03MMC thermometers broadcasts
//! Environmental Sensing service data (UUID 0x181A) in a fixed big-endian
//! layout; see <https://github.com/atc1441/ATC_MiThermometer>.
//!
//! | offset | field                        |
//! |--------|------------------------------|
//! | 0-1    | service UUID `1A 18`         |
//! | 2-7    | device MAC                   |
//! | 8-9    | temperature, i16 tenths of C |
//! | 10     | humidity, percent            |
//! | 11     | battery, percent             |
//! | 12-13  | battery, millivolts          |
//! | 14     | frame counter                |

use super::{VendorDecoder, tenths};
use crate::envelope::AdvertisingElement;
use crate::reading::{SensorModel, SensorReading};

pub const SIGNATURE: [u8; 2] = [0x1A, 0x18];
pub const MIN_LENGTH: u8 = 16;

pub const DECODER: VendorDecoder = VendorDecoder {
    name: "atc",
    signature: SIGNATURE,
    min_length: MIN_LENGTH,
    decode,
};

pub fn decode(element: &AdvertisingElement<'_>) -> SensorReading {
    let &[_, _, _, _, _, _, _, _, t_hi, t_lo, humidity, battery, _, _, sequence, ..] =
        element.data
    else {
        return SensorReading::default();
    };

    SensorReading {
        model: SensorModel::Atc,
        sequence_id: sequence,
        temperature_celsius: Some(tenths(i16::from_be_bytes([t_hi, t_lo]))),
        humidity_percent: Some(f64::from(humidity)),
        battery_percent: Some(f64::from(battery)),
        ..Default::default()
    }
}
