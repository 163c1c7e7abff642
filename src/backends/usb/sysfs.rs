// SPDX-License-Identifier: GPL-3.0-only

//! Linux USB platform
//!
//! Enumerates devices from sysfs, checks access on the usbfs nodes and listens
//! for removals on the kernel uevent netlink socket. Linux has no interactive
//! permission prompt; a permission request answers immediately with the
//! current access state (udev rules decide it).

use std::ffi::CString;
use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::{DeviceIdentity, InterfaceClass, PlatformEvent, UsbControlBlock, UsbDevice, UsbPlatform};
use crate::backends::worker_loop::{LoopAction, LoopController};
use crate::constants::{paths, timing};
use crate::errors::{PresenceError, PresenceResult};

/// sysfs/usbfs backed [`UsbPlatform`]
pub struct SysfsUsbPlatform {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
    events: Mutex<Option<Sender<PlatformEvent>>>,
    watcher: Mutex<Option<LoopController>>,
}

impl Default for SysfsUsbPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsUsbPlatform {
    pub fn new() -> Self {
        Self::with_roots(paths::SYSFS_USB_DEVICES, paths::DEV_BUS_USB)
    }

    /// Platform reading from custom sysfs and usbfs roots
    pub fn with_roots(sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
            events: Mutex::new(None),
            watcher: Mutex::new(None),
        }
    }

    fn read_device(&self, dir: &Path) -> Option<UsbDevice> {
        let vendor_id = read_hex_u16(&dir.join("idVendor"))?;
        let product_id = read_hex_u16(&dir.join("idProduct"))?;
        let busnum: u32 = read_attr(&dir.join("busnum"))?.parse().ok()?;
        let devnum: u32 = read_attr(&dir.join("devnum"))?.parse().ok()?;

        let mut identity = DeviceIdentity::new(
            vendor_id,
            product_id,
            read_hex_u8(&dir.join("bDeviceClass")).unwrap_or(0),
            read_hex_u8(&dir.join("bDeviceSubClass")).unwrap_or(0),
            read_hex_u8(&dir.join("bDeviceProtocol")).unwrap_or(0),
        );
        identity.serial = read_attr(&dir.join("serial"));
        identity.manufacturer = read_attr(&dir.join("manufacturer"));
        identity.config_count = read_attr(&dir.join("bNumConfigurations")).and_then(|v| v.parse().ok());
        identity.version = read_attr(&dir.join("bcdDevice"));

        Some(UsbDevice {
            device_name: node_name(&self.dev_root, busnum, devnum),
            identity,
            product_name: read_attr(&dir.join("product")),
            interfaces: read_interfaces(dir),
            sysfs_path: Some(dir.to_path_buf()),
        })
    }
}

impl UsbPlatform for SysfsUsbPlatform {
    fn device_list(&self) -> Vec<Arc<UsbDevice>> {
        let Ok(entries) = std::fs::read_dir(&self.sysfs_root) else {
            warn!(root = %self.sysfs_root.display(), "Cannot read USB sysfs directory");
            return Vec::new();
        };

        let mut devices: Vec<Arc<UsbDevice>> = entries
            .flatten()
            .filter(|entry| !entry.file_name().to_string_lossy().contains(':'))
            .filter_map(|entry| self.read_device(&entry.path()))
            .map(Arc::new)
            .collect();
        devices.sort_by(|a, b| a.device_name.cmp(&b.device_name));
        devices
    }

    fn has_permission(&self, device: &UsbDevice) -> bool {
        let Ok(path) = CString::new(device.device_name.as_bytes()) else {
            return false;
        };
        unsafe { libc::access(path.as_ptr(), libc::R_OK | libc::W_OK) == 0 }
    }

    fn request_permission(&self, device: &UsbDevice) -> PresenceResult<()> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = events.as_ref() else {
            return Err(PresenceError::PermissionRequest(
                "platform events are not subscribed".to_string(),
            ));
        };
        let granted = self.has_permission(device);
        tx.send(PlatformEvent::PermissionResult {
            device: device.clone(),
            granted,
        })
        .map_err(|e| PresenceError::PermissionRequest(e.to_string()))
    }

    fn open(&self, device: &UsbDevice) -> PresenceResult<UsbControlBlock> {
        let node = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&device.device_name)
            .map_err(|e| PresenceError::Io(format!("{}: {}", device.device_name, e)))?;
        Ok(UsbControlBlock::new(device.clone(), Some(node)))
    }

    fn subscribe(&self, events: Sender<PlatformEvent>) -> PresenceResult<()> {
        let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events.clone());
        if watcher.is_some() {
            return Ok(());
        }

        let dev_root = self.dev_root.clone();
        let mut buf = vec![0u8; 8192];
        let controller = LoopController::start_with_init(
            "usb-uevent-watch",
            open_uevent_socket,
            move |socket: &mut OwnedFd, _| {
                let Some(len) = poll_recv(socket, &mut buf) else {
                    return LoopAction::Continue;
                };
                match parse_removal(&buf[..len], &dev_root) {
                    Some(device) => {
                        debug!(device = %device.device_name, "uevent removal");
                        if events.send(PlatformEvent::Detached(device)).is_err() {
                            return LoopAction::Stop;
                        }
                        LoopAction::Continue
                    }
                    None => LoopAction::Continue,
                }
            },
        )?;
        *watcher = Some(controller);
        info!("Subscribed to USB uevents");
        Ok(())
    }

    fn unsubscribe(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).take();
        let watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut watcher) = watcher {
            watcher.stop();
            info!("Unsubscribed from USB uevents");
        }
    }
}

fn node_name(dev_root: &Path, busnum: u32, devnum: u32) -> String {
    dev_root
        .join(format!("{:03}", busnum))
        .join(format!("{:03}", devnum))
        .to_string_lossy()
        .to_string()
}

fn read_attr(path: &Path) -> Option<String> {
    let value = std::fs::read_to_string(path).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn read_hex_u16(path: &Path) -> Option<u16> {
    u16::from_str_radix(&read_attr(path)?, 16).ok()
}

fn read_hex_u8(path: &Path) -> Option<u8> {
    u8::from_str_radix(&read_attr(path)?, 16).ok()
}

fn read_interfaces(dir: &Path) -> Vec<InterfaceClass> {
    let Some(name) = dir.file_name() else {
        return Vec::new();
    };
    let mut prefix = name.as_bytes().to_vec();
    prefix.push(b':');

    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|entry| entry.file_name().as_bytes().starts_with(&prefix))
        .filter_map(|entry| {
            let path = entry.path();
            Some(InterfaceClass {
                class: read_hex_u8(&path.join("bInterfaceClass"))?,
                subclass: read_hex_u8(&path.join("bInterfaceSubClass")).unwrap_or(0),
                protocol: read_hex_u8(&path.join("bInterfaceProtocol")).unwrap_or(0),
            })
        })
        .collect()
}

fn open_uevent_socket() -> Result<OwnedFd, String> {
    let fd = unsafe {
        libc::socket(
            libc::AF_NETLINK,
            libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
            libc::NETLINK_KOBJECT_UEVENT,
        )
    };
    if fd < 0 {
        return Err(format!("netlink socket: {}", std::io::Error::last_os_error()));
    }
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    // Group 1 carries kernel uevents
    addr.nl_groups = 1;

    let result = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        )
    };
    if result < 0 {
        return Err(format!("netlink bind: {}", std::io::Error::last_os_error()));
    }
    Ok(socket)
}

/// Wait for one datagram, bounded by the uevent poll timeout
fn poll_recv(socket: &OwnedFd, buf: &mut [u8]) -> Option<usize> {
    let mut pfd = libc::pollfd {
        fd: socket.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let ready = unsafe { libc::poll(&mut pfd, 1, timing::UEVENT_POLL_TIMEOUT_MS) };
    if ready <= 0 || pfd.revents & libc::POLLIN == 0 {
        return None;
    }
    let len = unsafe {
        libc::recv(
            socket.as_raw_fd(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
        )
    };
    (len > 0).then_some(len as usize)
}

/// Parse a kernel uevent datagram into the removed USB device
///
/// Only `remove` events of whole devices (`DEVTYPE=usb_device`) qualify;
/// interface removals arrive too and are skipped.
pub(crate) fn parse_removal(datagram: &[u8], dev_root: &Path) -> Option<UsbDevice> {
    let mut fields = datagram.split(|b| *b == 0).map(String::from_utf8_lossy);
    let header = fields.next()?;
    if !header.starts_with("remove@") {
        return None;
    }

    let mut env = std::collections::HashMap::new();
    for field in fields {
        if let Some((key, value)) = field.split_once('=') {
            env.insert(key.to_string(), value.to_string());
        }
    }

    if env.get("SUBSYSTEM").map(String::as_str) != Some("usb")
        || env.get("DEVTYPE").map(String::as_str) != Some("usb_device")
    {
        return None;
    }

    let busnum: u32 = env.get("BUSNUM")?.parse().ok()?;
    let devnum: u32 = env.get("DEVNUM")?.parse().ok()?;

    // PRODUCT=vid/pid/bcd in unpadded hex
    let mut product = env.get("PRODUCT")?.split('/');
    let vendor_id = u16::from_str_radix(product.next()?, 16).ok()?;
    let product_id = u16::from_str_radix(product.next()?, 16).ok()?;

    // TYPE=class/subclass/protocol in decimal
    let class_triple: Vec<u8> = env
        .get("TYPE")
        .map(|t| t.split('/').filter_map(|v| v.parse().ok()).collect())
        .unwrap_or_default();
    let class_at = |i: usize| class_triple.get(i).copied().unwrap_or(0);

    Some(UsbDevice {
        device_name: node_name(dev_root, busnum, devnum),
        identity: DeviceIdentity::new(vendor_id, product_id, class_at(0), class_at(1), class_at(2)),
        product_name: None,
        interfaces: Vec::new(),
        sysfs_path: env
            .get("DEVPATH")
            .map(|p| Path::new("/sys").join(p.trim_start_matches('/'))),
    })
}
