//! BLE scanner abstraction.
//!
//! Backends deliver every advertisement they receive as a
//! [`RawAdvertisement`]; decoding happens in the pipeline so all backends
//! share one decoder.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::RawAdvertisement;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Adapter name is not of the form `hciN`
    #[error("Invalid adapter '{0}': expected hciN")]
    InvalidAdapter(String),
    /// Backend not available (not compiled in)
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Channel buffer size for raw advertisements.
pub const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Scanner backends.
///
/// Both are always selectable; starting one that was not compiled in fails
/// with [`ScanError::BackendNotAvailable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[value(alias = "bluez")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[value(alias = "raw")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "hci") {
            Backend::Hci
        } else {
            Backend::Bluer
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Bluer => write!(f, "bluer"),
            Backend::Hci => write!(f, "hci"),
        }
    }
}

/// Parse an adapter name such as `hci0` into its device index.
pub fn adapter_index(adapter: &str) -> Result<u16, ScanError> {
    adapter
        .strip_prefix("hci")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| ScanError::InvalidAdapter(adapter.to_string()))
}

/// Start scanning on `adapter` using the specified backend.
///
/// The returned receiver yields every advertisement the radio reports,
/// indefinitely. Failing to acquire the adapter is reported here; the
/// channel closes if the radio goes away later.
pub async fn start_scan(
    backend: Backend,
    adapter: &str,
) -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
    match backend {
        Backend::Bluer => start_bluer(adapter).await,
        Backend::Hci => start_hci(adapter).await,
    }
}

#[cfg(feature = "bluer")]
async fn start_bluer(adapter: &str) -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
    self::bluer::start_scan(adapter).await
}

#[cfg(not(feature = "bluer"))]
async fn start_bluer(_adapter: &str) -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
    Err(ScanError::BackendNotAvailable(Backend::Bluer.to_string()))
}

#[cfg(feature = "hci")]
async fn start_hci(adapter: &str) -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
    self::hci::start_scan(adapter_index(adapter)?).await
}

#[cfg(not(feature = "hci"))]
async fn start_hci(adapter: &str) -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
    adapter_index(adapter)?;
    Err(ScanError::BackendNotAvailable(Backend::Hci.to_string()))
}
