//! BlueZ D-Bus backend.
//!
//! BlueZ hands out parsed device properties rather than the raw advertising
//! payload, so service data is re-serialized into AD structures before it
//! reaches the decoder. Other AD types are not reconstructed.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::RawAdvertisement;
use crate::envelope::AD_TYPE_SERVICE_DATA;
use crate::mac_address::MacAddress;
use bluer::{
    Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session, Uuid,
};
use futures::StreamExt;
use log::{debug, error, warn};
use std::collections::HashMap;
use tokio::sync::mpsc;

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// The 16-bit short form of `uuid`, if it is derived from the Bluetooth base UUID.
fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let short = value >> 96;
    if short <= 0xFFFF && value & !(0xFFFF_FFFF << 96) == BLUETOOTH_BASE_UUID {
        Some(short as u16)
    } else {
        None
    }
}

/// Serialize service data as `[len, 0x16, uuid16 LE, data]` AD structures.
///
/// Entries with 128-bit UUIDs or payloads too long for one structure are skipped.
fn service_data_payload(service_data: &HashMap<Uuid, Vec<u8>>) -> Vec<u8> {
    let mut entries: Vec<(u16, &Vec<u8>)> = service_data
        .iter()
        .filter_map(|(uuid, data)| short_uuid(uuid).map(|short| (short, data)))
        .collect();
    entries.sort_by_key(|(short, _)| *short);

    let mut payload = Vec::new();
    for (short, data) in entries {
        let Ok(length) = u8::try_from(data.len() + 3) else {
            continue;
        };
        payload.push(length);
        payload.push(AD_TYPE_SERVICE_DATA);
        payload.extend_from_slice(&short.to_le_bytes());
        payload.extend_from_slice(data);
    }
    payload
}

/// Start scanning on `adapter_name` using the BlueZ D-Bus backend.
///
/// Discovery runs with duplicate reporting on, so every advertisement
/// refreshes the device and is sent through the returned channel until the
/// receiver is dropped.
pub async fn start_scan(adapter_name: &str) -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.adapter(adapter_name)?;
    adapter.set_powered(true).await?;
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;

    let events = adapter.discover_devices_with_changes().await?;
    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        // Keep all Bluetooth state alive by moving it into this task
        let _session = session;
        let mut events = Box::pin(events);

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };
            match read_advertisement(&adapter, address).await {
                Ok(advertisement) => {
                    if tx.send(advertisement).await.is_err() {
                        debug!("advertisement receiver dropped, stopping BlueZ discovery");
                        return;
                    }
                }
                Err(e) => warn!("[{}] {e}", MacAddress::from(address)),
            }
        }
        error!("BlueZ discovery stream ended");
    });

    Ok(rx)
}

/// Read the current advertisement properties of a discovered device.
async fn read_advertisement(
    adapter: &Adapter,
    address: Address,
) -> Result<RawAdvertisement, ScanError> {
    let device = adapter.device(address)?;
    let data = device
        .service_data()
        .await?
        .map(|service_data| service_data_payload(&service_data))
        .unwrap_or_default();

    Ok(RawAdvertisement {
        address: address.into(),
        rssi: device.rssi().await?.unwrap_or_default(),
        // BlueZ does not expose the advertising PDU type.
        connectable: false,
        data,
        local_name: device.name().await?,
    })
}
