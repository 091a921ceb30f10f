//! `btle-exporter` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, signals and
//! process exit codes. Decoding lives in [`crate::envelope`] and
//! [`crate::decoder`]; the scan loop in [`crate::app`] ties decoding, device
//! tracking and metrics together and is tested with an injected scanner.

pub mod advertisement;
pub mod app;
pub mod decoder;
pub mod emitter;
pub mod envelope;
pub mod mac_address;
pub mod metrics;
pub mod names;
pub mod pidfile;
pub mod reading;
pub mod scanner;
pub mod tracker;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::RawAdvertisement;
pub use decoder::{DECODERS, VendorDecoder, decode_advertisement};
pub use envelope::{AdvertisingElement, DecodeError};
pub use mac_address::MacAddress;
pub use metrics::{Metrics, MetricsError};
pub use names::{Alias, NameDirectory, parse_alias};
pub use reading::{SensorModel, SensorReading};
pub use scanner::{Backend, ScanError};
pub use tracker::{DeviceStateTracker, Observation};
