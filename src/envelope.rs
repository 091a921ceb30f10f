//! Walker over the BLE advertising-data envelope.
//!
//! Advertising data is a run of AD structures, each laid out as
//! `[length, ad_type, payload...]` where `length` counts the type byte plus
//! the payload. See Bluetooth Core Specification Vol 3, Part C, section 11.
//!
//! The walker is tolerant of trailing garbage: it stops as soon as fewer than
//! two bytes remain, even if the last byte is a non-zero length. An element
//! whose declared length runs past the buffer is reported once as
//! [`DecodeError::Truncated`] and ends the walk.

use thiserror::Error;

/// AD type for 16-bit UUID service data.
pub const AD_TYPE_SERVICE_DATA: u8 = 0x16;
/// AD type for a shortened local name.
pub const AD_TYPE_SHORT_LOCAL_NAME: u8 = 0x08;
/// AD type for a complete local name.
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;

/// Structural failures of the advertising-data envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// An AD structure claims more bytes than the buffer holds
    #[error(
        "AD structure at offset {offset} declares length {declared} but only {available} bytes follow"
    )]
    Truncated {
        offset: usize,
        declared: u8,
        available: usize,
    },
}

/// One AD structure borrowed from an advertisement payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingElement<'a> {
    /// Declared length: includes the type byte
    pub length: u8,
    pub ad_type: u8,
    /// Element payload, exactly `length - 1` bytes
    pub data: &'a [u8],
}

/// Iterator over the AD structures of one advertisement.
///
/// The walk borrows the buffer and never mutates it, so calling [`elements`]
/// again on the same buffer replays the same sequence.
#[derive(Debug, Clone)]
pub struct Elements<'a> {
    buf: &'a [u8],
    cursor: usize,
    failed: bool,
}

/// Walk the AD structures of `buf`.
pub fn elements(buf: &[u8]) -> Elements<'_> {
    Elements {
        buf,
        cursor: 0,
        failed: false,
    }
}

impl<'a> Iterator for Elements<'a> {
    type Item = Result<AdvertisingElement<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        // `cursor < len - 1`: a lone trailing byte is never read as a length.
        while self.cursor + 1 < self.buf.len() {
            let offset = self.cursor;
            let length = self.buf[offset];

            // Zero-length structures are padding.
            if length == 0 {
                self.cursor += 1;
                continue;
            }

            let available = self.buf.len() - offset - 1;
            if usize::from(length) > available {
                self.failed = true;
                return Some(Err(DecodeError::Truncated {
                    offset,
                    declared: length,
                    available,
                }));
            }

            let ad_type = self.buf[offset + 1];
            let data = &self.buf[offset + 2..offset + 1 + usize::from(length)];
            self.cursor = offset + usize::from(length) + 1;

            return Some(Ok(AdvertisingElement {
                length,
                ad_type,
                data,
            }));
        }

        None
    }
}

impl std::iter::FusedIterator for Elements<'_> {}

/// Extract the advertised local name, preferring the complete name.
pub fn local_name(buf: &[u8]) -> Option<String> {
    let mut short = None;
    for element in elements(buf).map_while(Result::ok) {
        match element.ad_type {
            AD_TYPE_COMPLETE_LOCAL_NAME => {
                return Some(String::from_utf8_lossy(element.data).into_owned());
            }
            AD_TYPE_SHORT_LOCAL_NAME if short.is_none() => {
                short = Some(String::from_utf8_lossy(element.data).into_owned());
            }
            _ => {}
        }
    }
    short
}
