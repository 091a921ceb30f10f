//! Display names for device addresses.
//!
//! Names come from a two-column CSV file (`address,name`, no header) and from
//! repeated `--alias MAC=NAME` flags. Lookups never fail: an unknown address
//! resolves to the empty string so the `name` metric label is always set.

use crate::mac_address::MacAddress;
use log::{info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;
use thiserror::Error;

/// A parsed alias mapping a device address to a human-readable name.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    pub address: MacAddress,
    pub name: String,
}

/// Parse an alias from a string in the format "MAC=NAME".
///
/// # Example
/// ```
/// use btle_exporter::names::parse_alias;
///
/// let alias = parse_alias("A4:C1:38:D0:2C:EC=Kitchen").unwrap();
/// assert_eq!(alias.address.to_string(), "a4:c1:38:d0:2c:ec");
/// assert_eq!(alias.name, "Kitchen");
/// ```
pub fn parse_alias(src: &str) -> Result<Alias, String> {
    let (address, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid alias: expected format MAC=NAME".to_string())?;
    let address = address
        .parse::<MacAddress>()
        .map_err(|e| format!("invalid alias: {e}"))?;
    Ok(Alias {
        address,
        name: name.into(),
    })
}

/// Errors while reading a names file.
#[derive(Error, Debug)]
pub enum NamesError {
    #[error("cannot open names file: {0}")]
    Io(#[from] io::Error),
    #[error("malformed names file: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed names file: line {line} has no name column")]
    MissingName { line: usize },
}

/// Read-only lookup from address to display name.
#[derive(Debug, Clone, Default)]
pub struct NameDirectory {
    names: HashMap<MacAddress, String>,
}

impl NameDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `address,name` records.
    ///
    /// Rows whose address does not parse are skipped with a warning. Any CSV
    /// level problem (including rows with differing column counts) rejects
    /// the whole input.
    pub fn from_csv_reader<R: io::Read>(reader: R) -> Result<Self, NamesError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(reader);

        let mut directory = Self::new();
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            let line = index + 1;
            let (Some(address), Some(name)) = (record.get(0), record.get(1)) else {
                return Err(NamesError::MissingName { line });
            };
            match address.parse::<MacAddress>() {
                Ok(mac) => directory.insert(mac, name),
                Err(e) => warn!("names file line {line}: skipping '{address}': {e}"),
            }
        }
        Ok(directory)
    }

    /// Read a names file from `path`.
    pub fn from_csv_path(path: &Path) -> Result<Self, NamesError> {
        let file = File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Load a names file, falling back to an empty directory on any error.
    pub fn load_csv(path: &Path) -> Self {
        match Self::from_csv_path(path) {
            Ok(directory) => {
                info!(
                    "Loaded {} names from csv file {}",
                    directory.len(),
                    path.display()
                );
                directory
            }
            Err(e) => {
                warn!("Failed to load {} - {e}", path.display());
                Self::new()
            }
        }
    }

    pub fn insert(&mut self, address: MacAddress, name: impl Into<String>) {
        self.names.insert(address, name.into());
    }

    /// Add aliases, replacing names loaded earlier for the same address.
    pub fn extend_aliases(&mut self, aliases: &[Alias]) {
        for alias in aliases {
            self.insert(alias.address, alias.name.clone());
        }
    }

    /// Name for `address`, or `""` when none is known.
    pub fn lookup(&self, address: &MacAddress) -> &str {
        self.names.get(address).map(String::as_str).unwrap_or("")
    }

    /// Name for a textual address in any case, or `""`.
    pub fn lookup_str(&self, address: &str) -> &str {
        address
            .parse::<MacAddress>()
            .map(|mac| self.lookup(&mac))
            .unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
