// SPDX-License-Identifier: GPL-3.0-only

//! USB device presence monitor
//!
//! Growth of the device set is found by polling: a scan thread enumerates the
//! platform's devices every `scan_interval` and reports when the number of
//! matching devices, or the number of permitted ones, went up. Shrinking is
//! reported from the platform's detach notifications, which a separate pump
//! thread handles as they arrive.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::filter;
use super::permission::PermissionCache;
use super::{PlatformEvent, UsbControlBlock, UsbDevice, UsbPlatform};
use crate::backends::worker_loop::{LoopAction, LoopController};
use crate::config::MonitorConfig;
use crate::errors::{PresenceError, PresenceResult};

/// Receiver of presence changes
///
/// Called from the monitor's scan and event threads, never while the monitor
/// holds a lock, so listeners may call back into the monitor.
pub trait PresenceListener: Send + Sync {
    /// The device set grew (`attached`) or a device went away
    fn on_changed(&self, attached: bool, device_count: usize);

    /// Result of a permission request
    fn on_permission(&self, _device: &UsbDevice, _granted: bool) {}
}

impl<F> PresenceListener for F
where
    F: Fn(bool, usize) + Send + Sync,
{
    fn on_changed(&self, attached: bool, device_count: usize) {
        self(attached, device_count)
    }
}

/// Outcome of [`DevicePresenceMonitor::request_permission`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    /// Access was already granted, no event follows
    AlreadyGranted,
    /// A request is pending, the answer arrives through `on_permission`
    Requested,
}

/// Presence event forwarded by [`ChannelListener`]
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    Changed { attached: bool, device_count: usize },
    Permission { device: UsbDevice, granted: bool },
}

/// Listener forwarding presence events into a tokio channel
pub struct ChannelListener {
    tx: tokio::sync::mpsc::UnboundedSender<PresenceEvent>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<PresenceEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl PresenceListener for ChannelListener {
    fn on_changed(&self, attached: bool, device_count: usize) {
        let _ = self.tx.send(PresenceEvent::Changed {
            attached,
            device_count,
        });
    }

    fn on_permission(&self, device: &UsbDevice, granted: bool) {
        let _ = self.tx.send(PresenceEvent::Permission {
            device: device.clone(),
            granted,
        });
    }
}

#[derive(Default)]
struct MonitorState {
    listener: Option<Arc<dyn PresenceListener>>,
    /// Device count last reported (or silently lowered to)
    device_count: usize,
    destroyed: bool,
    scanner: Option<LoopController>,
    pump: Option<LoopController>,
}

struct MonitorInner {
    platform: Arc<dyn UsbPlatform>,
    config: MonitorConfig,
    permissions: PermissionCache,
    /// Matching devices seen by scans and not detached since, by device name
    known: Mutex<HashMap<String, Arc<UsbDevice>>>,
    /// Control blocks opened through the monitor, by device name
    control_blocks: Mutex<HashMap<String, UsbControlBlock>>,
    state: Mutex<MonitorState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MonitorInner {
    fn check_destroyed(&self) -> PresenceResult<()> {
        if lock(&self.state).destroyed {
            Err(PresenceError::AlreadyDestroyed)
        } else {
            Ok(())
        }
    }

    fn matching_devices(&self) -> Vec<Arc<UsbDevice>> {
        self.platform
            .device_list()
            .into_iter()
            .filter(|device| filter::accepts(&self.config.filters, device))
            .collect()
    }

    fn scan(&self) {
        let devices = self.matching_devices();
        let count = devices.len();

        let permitted: Vec<&Arc<UsbDevice>> = devices
            .iter()
            .filter(|device| self.platform.has_permission(device))
            .collect();
        let (permitted_before, permitted_now) = self.permissions.rebuild(permitted);

        // Vanished devices stay known until their detach arrives
        lock(&self.known).extend(
            devices
                .iter()
                .map(|device| (device.device_name.clone(), Arc::clone(device))),
        );

        let listener = {
            let mut state = lock(&self.state);
            if state.destroyed {
                return;
            }
            let grew = count > state.device_count || permitted_now > permitted_before;
            if count < state.device_count {
                debug!(
                    old_count = state.device_count,
                    new_count = count,
                    "Device count dropped without detach notification"
                );
            }
            state.device_count = count;
            if grew { state.listener.clone() } else { None }
        };

        if let Some(listener) = listener {
            info!(
                device_count = count,
                permitted = permitted_now,
                "USB device set grew"
            );
            listener.on_changed(true, count);
        }
    }

    fn handle_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::Detached(device) => self.handle_detached(device),
            PlatformEvent::PermissionResult { device, granted } => {
                let device = Arc::new(device);
                self.permissions.update(&device, granted);
                info!(device = %device.device_name, granted, "Permission result");
                let listener = lock(&self.state).listener.clone();
                if let Some(listener) = listener {
                    listener.on_permission(&device, granted);
                }
            }
        }
    }

    fn handle_detached(&self, device: UsbDevice) {
        let known = lock(&self.known).remove(&device.device_name);
        let device = match known {
            Some(known) => (*known).clone(),
            None if self.config.filters.is_empty()
                || lock(&self.control_blocks).contains_key(&device.device_name) =>
            {
                device
            }
            None => {
                debug!(device = %device.device_name, "Ignoring detach of unmatched device");
                return;
            }
        };

        if let Some(block) = lock(&self.control_blocks).remove(&device.device_name) {
            block.close();
        }
        self.permissions.evict(&device.identity);

        let count = self.matching_devices().len();
        let listener = {
            let mut state = lock(&self.state);
            if state.destroyed {
                return;
            }
            state.device_count = count;
            state.listener.clone()
        };

        info!(device = %device.device_name, device_count = count, "USB device detached");
        if let Some(listener) = listener {
            listener.on_changed(false, count);
        }
    }
}

/// Watches the USB bus for matching devices
///
/// Dropping the monitor destroys it.
pub struct DevicePresenceMonitor {
    inner: Arc<MonitorInner>,
}

impl DevicePresenceMonitor {
    pub fn new(platform: Arc<dyn UsbPlatform>, config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                platform,
                config,
                permissions: PermissionCache::new(),
                known: Mutex::new(HashMap::new()),
                control_blocks: Mutex::new(HashMap::new()),
                state: Mutex::new(MonitorState::default()),
            }),
        }
    }

    /// Start scanning and listening for platform events
    ///
    /// Registering again replaces the listener and keeps the running threads.
    pub fn register(&self, listener: Arc<dyn PresenceListener>) -> PresenceResult<()> {
        let mut state = lock(&self.inner.state);
        if state.destroyed {
            return Err(PresenceError::AlreadyDestroyed);
        }
        state.listener = Some(listener);
        if state.scanner.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        self.inner.platform.subscribe(tx)?;

        state.pump = Some(spawn_pump(Arc::downgrade(&self.inner), rx)?);
        state.scanner = Some(spawn_scanner(
            Arc::downgrade(&self.inner),
            self.inner.config.initial_delay,
            self.inner.config.scan_interval,
        )?);

        info!(
            interval_ms = self.inner.config.scan_interval.as_millis() as u64,
            "Presence monitor registered"
        );
        Ok(())
    }

    /// Stop scanning; does nothing when not registered
    pub fn unregister(&self) {
        let (scanner, pump) = {
            let mut state = lock(&self.inner.state);
            state.listener = None;
            (state.scanner.take(), state.pump.take())
        };
        if scanner.is_none() && pump.is_none() {
            return;
        }

        self.inner.platform.unsubscribe();
        // Threads are joined outside the state lock, they take it themselves
        drop(scanner);
        drop(pump);
        info!("Presence monitor unregistered");
    }

    /// Unregister and refuse every later call
    pub fn destroy(&self) {
        self.unregister();
        {
            let mut state = lock(&self.inner.state);
            if state.destroyed {
                return;
            }
            state.destroyed = true;
        }
        for (_, block) in lock(&self.inner.control_blocks).drain() {
            block.close();
        }
        self.inner.permissions.clear();
        lock(&self.inner.known).clear();
        info!("Presence monitor destroyed");
    }

    pub fn is_registered(&self) -> bool {
        lock(&self.inner.state).scanner.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.inner.state).destroyed
    }

    /// Run one scan now, on the calling thread
    pub fn scan(&self) -> PresenceResult<()> {
        self.inner.check_destroyed()?;
        self.inner.scan();
        Ok(())
    }

    /// Attached devices accepted by the configured filters
    pub fn device_list(&self) -> PresenceResult<Vec<Arc<UsbDevice>>> {
        self.inner.check_destroyed()?;
        Ok(self.inner.matching_devices())
    }

    pub fn device_count(&self) -> PresenceResult<usize> {
        Ok(self.device_list()?.len())
    }

    /// Number of devices in the permission cache
    pub fn permitted_count(&self) -> usize {
        self.inner.permissions.len()
    }

    /// Ask the platform and record the answer in the permission cache
    pub fn has_permission(&self, device: &Arc<UsbDevice>) -> PresenceResult<bool> {
        self.inner.check_destroyed()?;
        let granted = self.inner.platform.has_permission(device);
        Ok(self.inner.permissions.update(device, granted))
    }

    /// Request access to a device
    pub fn request_permission(&self, device: &Arc<UsbDevice>) -> PresenceResult<PermissionStatus> {
        if self.has_permission(device)? {
            return Ok(PermissionStatus::AlreadyGranted);
        }
        self.inner.platform.request_permission(device)?;
        debug!(device = %device.device_name, "Permission requested");
        Ok(PermissionStatus::Requested)
    }

    /// Open a device for a camera session
    ///
    /// The monitor keeps the block and closes it when the device detaches.
    /// An open block for the same device is shared rather than reopened.
    pub fn open_device(&self, device: &Arc<UsbDevice>) -> PresenceResult<UsbControlBlock> {
        if !self.has_permission(device)? {
            return Err(PresenceError::PermissionDenied(device.device_name.clone()));
        }

        let mut blocks = lock(&self.inner.control_blocks);
        if let Some(block) = blocks.get(&device.device_name)
            && !block.is_closed()
        {
            return Ok(block.clone());
        }

        let block = self.inner.platform.open(device)?;
        blocks.insert(device.device_name.clone(), block.clone());
        debug!(device = %device.device_name, "Control block opened");
        Ok(block)
    }
}

impl Drop for DevicePresenceMonitor {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn spawn_scanner(
    inner: Weak<MonitorInner>,
    initial_delay: Duration,
    interval: Duration,
) -> PresenceResult<LoopController> {
    let mut delay = initial_delay;
    LoopController::start("usb-presence-scan", move |stop| {
        if stop.wait_timeout(delay) {
            return LoopAction::Stop;
        }
        delay = interval;
        match inner.upgrade() {
            Some(inner) => {
                inner.scan();
                LoopAction::Continue
            }
            None => LoopAction::Stop,
        }
    })
    .map_err(PresenceError::from)
}

fn spawn_pump(inner: Weak<MonitorInner>, events: Receiver<PlatformEvent>) -> PresenceResult<LoopController> {
    LoopController::start("usb-presence-events", move |_| {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => match inner.upgrade() {
                Some(inner) => {
                    inner.handle_event(event);
                    LoopAction::Continue
                }
                None => LoopAction::Stop,
            },
            Err(RecvTimeoutError::Timeout) => LoopAction::Continue,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Platform event channel closed");
                LoopAction::Stop
            }
        }
    })
    .map_err(PresenceError::from)
}
