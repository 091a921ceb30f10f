//! Raw HCI socket backend.
//!
//! Puts the controller into passive LE scanning with duplicate filtering off
//! and forwards every LE Advertising Report. No BlueZ daemon is needed, but
//! the process requires CAP_NET_RAW and CAP_NET_ADMIN (or root).

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::RawAdvertisement;
use crate::envelope;
use crate::mac_address::MacAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use log::{debug, error};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

/// Scan interval and window, in 0.625 ms units (10 ms each).
const SCAN_INTERVAL: u16 = 0x0010;
const SCAN_WINDOW: u16 = 0x0010;

// Advertising report event types
const ADV_IND: u8 = 0x00;
const ADV_DIRECT_IND: u8 = 0x01;

/// Largest HCI event: 3 header bytes plus 255 parameter bytes.
const MAX_EVENT_SIZE: usize = 258;

#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// Kernel-side packet filter for raw HCI sockets.
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn le_meta_events() -> Self {
        let mut filter = Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        };
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);
        filter
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << u32::from(ptype);
    }

    fn set_event(&mut self, event: u8) {
        let bit = usize::from(event);
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

fn os_error(what: &str) -> ScanError {
    ScanError::Bluetooth(format!("{what}: {}", io::Error::last_os_error()))
}

/// Build an HCI command packet.
fn command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

fn set_scan_parameters_packet() -> Vec<u8> {
    let mut params = vec![LE_SCAN_PASSIVE];
    params.extend_from_slice(&SCAN_INTERVAL.to_le_bytes());
    params.extend_from_slice(&SCAN_WINDOW.to_le_bytes());
    params.extend_from_slice(&[LE_PUBLIC_ADDRESS, FILTER_POLICY_ACCEPT_ALL]);
    command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params)
}

fn set_scan_enable_packet(enable: bool) -> Vec<u8> {
    // Duplicate filtering off: every advertisement counts.
    command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[u8::from(enable), 0x00])
}

/// A raw HCI socket bound to one controller.
struct HciSocket {
    fd: OwnedFd,
}

impl HciSocket {
    fn open(dev_id: u16) -> Result<Self, ScanError> {
        // SOCK_NONBLOCK is required for AsyncFd.
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
                BTPROTO_HCI,
            )
        };
        if fd < 0 {
            return Err(os_error("Failed to create HCI socket"));
        }
        let socket = Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        };

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        let ret = unsafe {
            libc::bind(
                socket.fd.as_raw_fd(),
                &addr as *const SockaddrHci as *const sockaddr,
                mem::size_of::<SockaddrHci>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error(&format!("Failed to bind HCI socket to hci{dev_id}")));
        }

        Ok(socket)
    }

    fn set_filter(&self, filter: &HciFilter) -> Result<(), ScanError> {
        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                filter as *const HciFilter as *const c_void,
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to set HCI filter"));
        }
        Ok(())
    }

    fn send(&self, packet: &[u8]) -> Result<(), ScanError> {
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                packet.as_ptr() as *const c_void,
                packet.len(),
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to send HCI command"));
        }
        Ok(())
    }
}

/// Parse an HCI LE Advertising Report event into raw advertisements.
///
/// `event` starts at the HCI packet type byte. Reports are laid out one after
/// the other: event type, address type, address (little-endian), data
/// length, data, RSSI. Parsing stops at the first report that does not fit.
fn parse_advertising_reports(event: &[u8]) -> Vec<RawAdvertisement> {
    let mut out = Vec::new();

    let &[
        HCI_EVENT_PKT,
        EVT_LE_META_EVENT,
        _,
        EVT_LE_ADVERTISING_REPORT,
        num_reports,
        ref reports @ ..,
    ] = event
    else {
        return out;
    };

    let mut rest = reports;
    for _ in 0..num_reports {
        let &[event_type, _addr_type, a0, a1, a2, a3, a4, a5, data_len, ref tail @ ..] = rest
        else {
            break;
        };
        let Some((data, after)) = tail.split_at_checked(usize::from(data_len)) else {
            break;
        };
        let Some((&rssi, after)) = after.split_first() else {
            break;
        };

        out.push(RawAdvertisement {
            address: MacAddress([a5, a4, a3, a2, a1, a0]),
            rssi: i16::from(rssi as i8),
            connectable: matches!(event_type, ADV_IND | ADV_DIRECT_IND),
            data: data.to_vec(),
            local_name: envelope::local_name(data),
        });
        rest = after;
    }

    out
}

/// Start scanning on controller `dev_id` using raw HCI sockets.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - The HCI device must be up
pub async fn start_scan(dev_id: u16) -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
    let events = HciSocket::open(dev_id)?;
    events.set_filter(&HciFilter::le_meta_events())?;

    // Commands go through a second socket so the event socket's filter
    // never sees our own command traffic.
    let commands = HciSocket::open(dev_id)?;
    commands.send(&set_scan_enable_packet(false))?;
    commands.send(&set_scan_parameters_packet())?;
    commands.send(&set_scan_enable_packet(true))?;

    let async_fd = AsyncFd::new(events.fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        let _commands = commands;
        let mut buf = [0u8; MAX_EVENT_SIZE];

        loop {
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    error!("HCI socket wait failed: {e}");
                    return;
                }
            };

            // Drain everything queued before waiting again.
            loop {
                let n = match guard.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(Ok(0)) => {
                        error!("HCI socket closed");
                        return;
                    }
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => {
                        error!("HCI socket read failed: {e}");
                        return;
                    }
                    Err(_would_block) => break,
                };

                for advertisement in parse_advertising_reports(&buf[..n]) {
                    if tx.send(advertisement).await.is_err() {
                        debug!("advertisement receiver dropped, stopping HCI reader");
                        return;
                    }
                }
            }
        }
    });

    Ok(rx)
}
