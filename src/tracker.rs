//! Per-device observation state.
//!
//! The tracker remembers, for every address seen during the process
//! lifetime, whether a detailed log line has already been written and when
//! the device last advertised. It decides log verbosity only; metrics are
//! updated for every advertisement regardless of what it returns.

use crate::mac_address::MacAddress;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// State kept for one device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceObservationState {
    /// A detailed log line was written for this address
    pub ever_logged: bool,
    /// Unix time of the most recent advertisement, decoded or not
    pub last_seen_unix_seconds: u64,
    /// The address was counted as a device
    pub ever_counted: bool,
    /// The address was counted as a supported device
    pub ever_supported: bool,
}

/// What a single call to [`DeviceStateTracker::observe`] concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Write a detailed log line for this advertisement
    pub detailed_log: bool,
    /// First advertisement ever seen from this address
    pub first_sighting: bool,
    /// First detailed observation of this address that decoded
    pub first_counted: bool,
    /// First detailed observation of this address carrying a supported reading
    pub first_supported: bool,
}

/// Owned map from device address to its observation state.
///
/// Entries are created on first sighting and never evicted; the map is
/// bounded by the number of distinct devices in radio range over the
/// process lifetime.
#[derive(Debug, Default)]
pub struct DeviceStateTracker {
    devices: HashMap<MacAddress, DeviceObservationState>,
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl DeviceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advertisement from `address` at the current wall-clock time.
    ///
    /// `decoded_and_supported` says whether the advertisement produced a
    /// reading from a supported model; `force_verbose` requests a detailed
    /// log line even for devices that were already logged.
    pub fn observe(
        &mut self,
        address: MacAddress,
        decoded_and_supported: bool,
        force_verbose: bool,
    ) -> Observation {
        self.observe_at(address, decoded_and_supported, force_verbose, unix_now())
    }

    /// Same as [`observe`](Self::observe) with an explicit timestamp.
    pub fn observe_at(
        &mut self,
        address: MacAddress,
        decoded_and_supported: bool,
        force_verbose: bool,
        now_unix_seconds: u64,
    ) -> Observation {
        self.record(address, true, decoded_and_supported, force_verbose, now_unix_seconds)
    }

    /// Record an advertisement whose envelope could not be decoded.
    ///
    /// It consumes the detailed log like any other observation but never
    /// counts the device.
    pub fn observe_undecodable(&mut self, address: MacAddress, force_verbose: bool) -> Observation {
        self.observe_undecodable_at(address, force_verbose, unix_now())
    }

    /// Same as [`observe_undecodable`](Self::observe_undecodable) with an explicit timestamp.
    pub fn observe_undecodable_at(
        &mut self,
        address: MacAddress,
        force_verbose: bool,
        now_unix_seconds: u64,
    ) -> Observation {
        self.record(address, false, false, force_verbose, now_unix_seconds)
    }

    fn record(
        &mut self,
        address: MacAddress,
        decoded: bool,
        decoded_and_supported: bool,
        force_verbose: bool,
        now_unix_seconds: u64,
    ) -> Observation {
        let first_sighting = !self.devices.contains_key(&address);
        let state = self.devices.entry(address).or_default();

        state.last_seen_unix_seconds = now_unix_seconds;

        let detailed_log = !state.ever_logged || force_verbose;
        state.ever_logged = true;

        let first_counted = detailed_log && decoded && !state.ever_counted;
        if first_counted {
            state.ever_counted = true;
        }

        let first_supported = detailed_log && decoded_and_supported && !state.ever_supported;
        if first_supported {
            state.ever_supported = true;
        }

        Observation {
            detailed_log,
            first_sighting,
            first_counted,
            first_supported,
        }
    }

    pub fn state(&self, address: &MacAddress) -> Option<&DeviceObservationState> {
        self.devices.get(address)
    }

    pub fn last_seen(&self, address: &MacAddress) -> Option<u64> {
        self.state(address).map(|s| s.last_seen_unix_seconds)
    }

    /// Number of distinct addresses seen.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
