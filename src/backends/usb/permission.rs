// SPDX-License-Identifier: GPL-3.0-only

//! Record of devices with confirmed access permission

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::{DeviceIdentity, UsbDevice};

/// Identity key → most recently seen device holding the permission
///
/// Holds weak references only; the cache never keeps a device alive.
#[derive(Default)]
pub struct PermissionCache {
    entries: Mutex<HashMap<String, Weak<UsbDevice>>>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Weak<UsbDevice>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the permission state of a device, returns `granted`
    pub fn update(&self, device: &Arc<UsbDevice>, granted: bool) -> bool {
        let key = device.identity.key();
        let mut entries = self.entries();
        if granted {
            entries.insert(key, Arc::downgrade(device));
        } else {
            entries.remove(&key);
        }
        granted
    }

    /// Drop the entry of a detached device
    pub fn evict(&self, identity: &DeviceIdentity) -> bool {
        self.entries().remove(&identity.key()).is_some()
    }

    /// Replace the whole cache with the permitted devices of one scan
    ///
    /// Returns the entry count before and after.
    pub fn rebuild<'a>(&self, permitted: impl IntoIterator<Item = &'a Arc<UsbDevice>>) -> (usize, usize) {
        let mut entries = self.entries();
        let before = entries.len();
        entries.clear();
        for device in permitted {
            entries
                .entry(device.identity.key())
                .or_insert_with(|| Arc::downgrade(device));
        }
        (before, entries.len())
    }

    pub fn contains(&self, identity: &DeviceIdentity) -> bool {
        self.entries().contains_key(&identity.key())
    }

    /// The last seen device for an identity, if it is still alive
    pub fn device(&self, identity: &DeviceIdentity) -> Option<Arc<UsbDevice>> {
        self.entries().get(&identity.key()).and_then(Weak::upgrade)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }
}
