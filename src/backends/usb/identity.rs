// SPDX-License-Identifier: GPL-3.0-only

//! Stable identity keys for USB devices

use serde::{Deserialize, Serialize};
use std::fmt;

/// Descriptor fields identifying a kind of USB device
///
/// Two identities with the same [`key`](DeviceIdentity::key) are treated as the
/// same device for permission bookkeeping. This is best-effort de-duplication;
/// two identical cameras without serial numbers share a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub serial: Option<String>,
    pub manufacturer: Option<String>,
    pub config_count: Option<u8>,
    /// bcdDevice as reported by the platform
    pub version: Option<String>,
}

impl DeviceIdentity {
    pub fn new(vendor_id: u16, product_id: u16, class: u8, subclass: u8, protocol: u8) -> Self {
        Self {
            vendor_id,
            product_id,
            class,
            subclass,
            protocol,
            ..Default::default()
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Whether the platform supplied any of the optional descriptor strings
    pub fn has_extended_fields(&self) -> bool {
        self.manufacturer.is_some() || self.config_count.is_some() || self.version.is_some()
    }

    /// Composite key, `vid#pid#class#subclass#protocol[#serial][#...extended#]`
    pub fn key(&self) -> String {
        let mut key = format!(
            "{}#{}#{}#{}#{}",
            self.vendor_id, self.product_id, self.class, self.subclass, self.protocol
        );

        let serial = self.serial.as_deref().filter(|s| !s.is_empty());
        if let Some(serial) = serial {
            key.push('#');
            key.push_str(serial);
        }

        if self.has_extended_fields() {
            key.push('#');
            if serial.is_none() {
                key.push('#');
            }
            key.push_str(self.manufacturer.as_deref().unwrap_or_default());
            key.push('#');
            if let Some(count) = self.config_count {
                key.push_str(&count.to_string());
            }
            key.push('#');
            key.push_str(self.version.as_deref().unwrap_or_default());
            key.push('#');
        }

        key
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}
