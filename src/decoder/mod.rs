//! Vendor payload decoding.
//!
//! Both supported sensor families ride inside a Service Data AD structure and
//! are told apart by the 16-bit service UUID at the start of the payload. The
//! [`DECODERS`] table lists them in the order they are tried; the first row
//! whose signature and minimum length match decodes the element.

pub mod atc;
pub mod xiaomi;

use crate::envelope::{self, AD_TYPE_SERVICE_DATA, AdvertisingElement, DecodeError};
use crate::reading::SensorReading;
use log::debug;

/// One entry of the vendor dispatch table.
#[derive(Debug, Clone, Copy)]
pub struct VendorDecoder {
    pub name: &'static str,
    /// First two payload bytes (the service UUID, little-endian)
    pub signature: [u8; 2],
    /// Minimum declared AD length, type byte included
    pub min_length: u8,
    pub decode: fn(&AdvertisingElement<'_>) -> SensorReading,
}

impl VendorDecoder {
    /// Decode `element` if it is service data carrying this vendor's signature.
    pub fn try_decode(&self, element: &AdvertisingElement<'_>) -> Option<SensorReading> {
        if element.ad_type != AD_TYPE_SERVICE_DATA
            || element.length < self.min_length
            || !element.data.starts_with(&self.signature)
        {
            return None;
        }
        Some((self.decode)(element))
    }
}

/// Decoders tried in order for every service-data element.
pub const DECODERS: &[VendorDecoder] = &[xiaomi::DECODER, atc::DECODER];

/// Decode a raw advertising payload with the built-in decoder table.
///
/// Returns a reading with [`SensorModel::Unknown`](crate::reading::SensorModel::Unknown)
/// when nothing matched; only a malformed envelope is an error.
pub fn decode_advertisement(data: &[u8]) -> Result<SensorReading, DecodeError> {
    decode_with(DECODERS, data)
}

/// Decode a raw advertising payload against an explicit decoder table.
///
/// The whole envelope is always walked, so a truncated trailing structure is
/// reported even when an earlier element already produced a reading.
pub fn decode_with(
    decoders: &[VendorDecoder],
    data: &[u8],
) -> Result<SensorReading, DecodeError> {
    let mut reading = None;

    for element in envelope::elements(data) {
        let element = element?;
        if reading.is_none() {
            reading = decoders.iter().find_map(|d| {
                let decoded = d.try_decode(&element)?;
                debug!("{} decoder matched: {}", d.name, decoded.model);
                Some(decoded)
            });
        }
    }

    Ok(reading.unwrap_or_default())
}

/// Signed 16-bit value scaled down to one decimal place.
pub(crate) fn tenths(raw: i16) -> f64 {
    f64::from(raw) / 10.0
}
