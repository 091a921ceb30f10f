//! Raw BLE advertisement record as delivered by a scanner backend.

use crate::mac_address::MacAddress;

/// One BLE broadcast as seen by the radio, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisement {
    /// Advertiser address
    pub address: MacAddress,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Whether the advertising event type accepts connections
    pub connectable: bool,
    /// Advertising data: a sequence of length-prefixed AD structures
    pub data: Vec<u8>,
    /// Local name advertised by the device itself, if any
    pub local_name: Option<String>,
}

impl RawAdvertisement {
    /// Label used in log lines for the connectable flag.
    pub fn connectable_label(&self) -> &'static str {
        if self.connectable {
            "Connectable"
        } else {
            "NotConnectable"
        }
    }
}
