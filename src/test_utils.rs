use crate::advertisement::RawAdvertisement;
use crate::envelope::AD_TYPE_SERVICE_DATA;
use crate::mac_address::MacAddress;

/// A stable address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0xD0, 0x2C, 0xEC]);

/// Flags AD structure most sensors put first.
pub const FLAGS: [u8; 3] = [0x02, 0x01, 0x06];

/// Build a MiBeacon service-data AD structure with declared length `length`.
///
/// `body` is written at payload offset 16; the rest is zero padded (or cut)
/// so the payload is exactly `length - 1` bytes.
pub fn mibeacon(
    model_id: u16,
    frame_type: u8,
    sub_len: u8,
    sequence: u8,
    body: &[u8],
    length: u8,
) -> Vec<u8> {
    let mut payload = vec![0x95, 0xFE, 0x50, 0x20];
    payload.extend_from_slice(&model_id.to_le_bytes());
    payload.push(sequence);
    payload.extend_from_slice(&[0xEC, 0x2C, 0xD0, 0x38, 0xC1, 0xA4]);
    payload.extend_from_slice(&[frame_type, 0x10, sub_len]);
    payload.extend_from_slice(body);
    payload.resize(usize::from(length) - 1, 0x00);

    let mut element = vec![length, AD_TYPE_SERVICE_DATA];
    element.extend(payload);
    element
}

/// Build an ATC (custom firmware) service-data AD structure.
pub fn atc(temperature_raw: i16, humidity: u8, battery: u8, sequence: u8) -> Vec<u8> {
    let mut element = vec![0x10, AD_TYPE_SERVICE_DATA, 0x1A, 0x18];
    element.extend_from_slice(&[0xA4, 0xC1, 0x38, 0xD0, 0x2C, 0xEC]);
    element.extend_from_slice(&temperature_raw.to_be_bytes());
    element.extend_from_slice(&[humidity, battery, 0x0B, 0xB8, sequence]);
    element
}

/// Concatenate AD structures into one advertising payload.
pub fn payload(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

/// Wrap a payload into a raw advertisement from `mac`.
pub fn advertisement(mac: MacAddress, data: Vec<u8>) -> RawAdvertisement {
    RawAdvertisement {
        address: mac,
        rssi: -70,
        connectable: false,
        data,
        local_name: None,
    }
}
