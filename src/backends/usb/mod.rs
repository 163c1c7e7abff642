// SPDX-License-Identifier: GPL-3.0-only

//! USB device presence and permission tracking
//!
//! - [`identity`]: stable keys derived from descriptor fields
//! - [`filter`]: which devices count as cameras
//! - [`permission`]: devices with confirmed access
//! - [`monitor`]: polling scan plus detach notifications
//! - [`sysfs`]: Linux platform backed by sysfs, usbfs and kernel uevents

pub mod filter;
pub mod identity;
pub mod monitor;
pub mod permission;
#[cfg(target_os = "linux")]
pub mod sysfs;

pub use filter::DeviceFilter;
pub use identity::DeviceIdentity;
pub use monitor::{
    ChannelListener, DevicePresenceMonitor, PermissionStatus, PresenceEvent, PresenceListener,
};
pub use permission::PermissionCache;
#[cfg(target_os = "linux")]
pub use sysfs::SysfsUsbPlatform;

use std::fmt;
use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use crate::errors::PresenceResult;

/// Class triple of one USB interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceClass {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

/// An attached USB device as enumerated by the platform
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbDevice {
    /// Platform node name, e.g. `/dev/bus/usb/001/004`
    pub device_name: String,
    pub identity: DeviceIdentity,
    pub product_name: Option<String>,
    pub interfaces: Vec<InterfaceClass>,
    /// sysfs directory of the device, when the platform has one
    pub sysfs_path: Option<PathBuf>,
}

impl fmt::Display for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.product_name {
            Some(name) => write!(f, "{} ({} {})", self.device_name, self.identity, name),
            None => write!(f, "{} ({})", self.device_name, self.identity),
        }
    }
}

struct ControlBlockInner {
    device: UsbDevice,
    node: Mutex<Option<File>>,
    closed: AtomicBool,
}

/// An opened USB device, handed to a camera driver
///
/// Clones share the same underlying node. Closing any clone closes all of
/// them; the presence monitor does this when the device detaches.
#[derive(Clone)]
pub struct UsbControlBlock {
    inner: Arc<ControlBlockInner>,
}

impl UsbControlBlock {
    /// Wrap an opened device node; `None` for platforms without one
    pub fn new(device: UsbDevice, node: Option<File>) -> Self {
        Self {
            inner: Arc::new(ControlBlockInner {
                device,
                node: Mutex::new(node),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn device(&self) -> &UsbDevice {
        &self.inner.device
    }

    /// Raw descriptor of the usbfs node while open
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.inner
            .node
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|file| file.as_raw_fd())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Release the device node; later calls do nothing
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner
            .node
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::debug!(device = %self.inner.device.device_name, "Control block closed");
    }
}

impl fmt::Debug for UsbControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsbControlBlock")
            .field("device", &self.inner.device.device_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Asynchronous notifications from the platform
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// Device removed from the bus
    Detached(UsbDevice),
    /// Answer to an earlier permission request
    PermissionResult { device: UsbDevice, granted: bool },
}

/// OS-facing side of the presence monitor
pub trait UsbPlatform: Send + Sync {
    /// Every attached device, unfiltered
    fn device_list(&self) -> Vec<Arc<UsbDevice>>;

    /// Whether the current process may open the device
    fn has_permission(&self, device: &UsbDevice) -> bool;

    /// Ask for access; the answer arrives as [`PlatformEvent::PermissionResult`]
    fn request_permission(&self, device: &UsbDevice) -> PresenceResult<()>;

    /// Open the device node
    fn open(&self, device: &UsbDevice) -> PresenceResult<UsbControlBlock>;

    /// Start delivering detach and permission events
    fn subscribe(&self, events: Sender<PlatformEvent>) -> PresenceResult<()>;

    /// Stop delivering events; idempotent
    fn unsubscribe(&self);
}
