// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 control access for UVC cameras
//!
//! Maps [`ControlFlag`] onto V4L2 control ids and reads/writes them with raw
//! ioctls on the video node, so value accessors work without the `v4l2`
//! streaming feature. Also locates the video nodes the uvcvideo driver
//! created for a USB device.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::types::ControlFlag;
use crate::errors::{DeviceError, DeviceResult};

// ===== V4L2 Control Class Bases =====
const V4L2_CTRL_CLASS_USER: u32 = 0x00980000;
const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a0000;

const V4L2_CID_BASE: u32 = V4L2_CTRL_CLASS_USER | 0x900;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = V4L2_CTRL_CLASS_CAMERA | 0x900;

// ===== V4L2 Control IDs =====
pub const V4L2_CID_BRIGHTNESS: u32 = V4L2_CID_BASE;
pub const V4L2_CID_CONTRAST: u32 = V4L2_CID_BASE + 1;
pub const V4L2_CID_SATURATION: u32 = V4L2_CID_BASE + 2;
pub const V4L2_CID_HUE: u32 = V4L2_CID_BASE + 3;
pub const V4L2_CID_GAMMA: u32 = V4L2_CID_BASE + 16;
pub const V4L2_CID_GAIN: u32 = V4L2_CID_BASE + 19;
pub const V4L2_CID_WHITE_BALANCE_TEMPERATURE: u32 = V4L2_CID_BASE + 26;
pub const V4L2_CID_SHARPNESS: u32 = V4L2_CID_BASE + 27;
pub const V4L2_CID_BACKLIGHT_COMPENSATION: u32 = V4L2_CID_BASE + 28;
/// Absolute exposure time in 100µs units
pub const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 2;
pub const V4L2_CID_FOCUS_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 10;
pub const V4L2_CID_ZOOM_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 13;

// ===== V4L2 Control Flags =====
const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;
const V4L2_CTRL_FLAG_READ_ONLY: u32 = 0x0004;
const V4L2_CTRL_FLAG_INACTIVE: u32 = 0x0010;

// ===== V4L2 Capabilities =====
const V4L2_CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
const V4L2_CAP_DEVICE_CAPS: u32 = 0x8000_0000;

// ===== V4L2 ioctl Numbers =====
// (dir << 30) | (size << 16) | ('V' << 8) | nr

/// Get control value (v4l2_control: 8 bytes)
const VIDIOC_G_CTRL: libc::c_ulong = 0xC008561B;
/// Set control value (v4l2_control: 8 bytes)
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;
/// Query control info (v4l2_queryctrl: 68 bytes)
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC0445624;
/// Query capabilities (v4l2_capability: 104 bytes)
const VIDIOC_QUERYCAP: libc::c_ulong = 0x80685600;

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

#[repr(C)]
struct V4l2Queryctrl {
    id: u32,
    ctrl_type: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

#[repr(C)]
struct V4l2Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

/// V4L2 control id for a flag
pub fn control_id(flag: ControlFlag) -> u32 {
    match flag {
        ControlFlag::Brightness => V4L2_CID_BRIGHTNESS,
        ControlFlag::Contrast => V4L2_CID_CONTRAST,
        ControlFlag::Hue => V4L2_CID_HUE,
        ControlFlag::Saturation => V4L2_CID_SATURATION,
        ControlFlag::Sharpness => V4L2_CID_SHARPNESS,
        ControlFlag::Gamma => V4L2_CID_GAMMA,
        ControlFlag::WhiteBalanceTemperature => V4L2_CID_WHITE_BALANCE_TEMPERATURE,
        ControlFlag::BacklightCompensation => V4L2_CID_BACKLIGHT_COMPENSATION,
        ControlFlag::Gain => V4L2_CID_GAIN,
        ControlFlag::ExposureAbsolute => V4L2_CID_EXPOSURE_ABSOLUTE,
        ControlFlag::FocusAbsolute => V4L2_CID_FOCUS_ABSOLUTE,
        ControlFlag::ZoomAbsolute => V4L2_CID_ZOOM_ABSOLUTE,
    }
}

/// Range information of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRange {
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default_value: i32,
    flags: u32,
}

impl ControlRange {
    /// Control exists but cannot be used
    pub fn is_disabled(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_DISABLED != 0
    }

    /// Control value cannot be written
    pub fn is_read_only(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_READ_ONLY != 0
    }

    /// Value cannot currently be changed (e.g. auto mode active)
    pub fn is_inactive(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_INACTIVE != 0
    }

    /// Clamp into range and snap to the step grid
    pub fn fit(&self, value: i32) -> i32 {
        let clamped = value.clamp(self.minimum, self.maximum);
        if self.step <= 1 {
            return clamped;
        }
        let offset = (clamped - self.minimum) / self.step * self.step;
        self.minimum + offset
    }
}

/// Control access on one video node
pub struct V4l2Controls {
    path: PathBuf,
    file: File,
}

impl V4l2Controls {
    /// Open the video node for control access
    pub fn open(path: impl AsRef<Path>) -> DeviceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| DeviceError::OpenFailed(format!("{}: {}", path.display(), e)))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Query range information, `None` when the device lacks the control
    pub fn query(&self, flag: ControlFlag) -> Option<ControlRange> {
        let mut qctrl = V4l2Queryctrl {
            id: control_id(flag),
            ctrl_type: 0,
            name: [0; 32],
            minimum: 0,
            maximum: 0,
            step: 0,
            default_value: 0,
            flags: 0,
            reserved: [0; 2],
        };

        let result = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                VIDIOC_QUERYCTRL,
                &mut qctrl as *mut V4l2Queryctrl,
            )
        };
        if result < 0 {
            return None;
        }

        Some(ControlRange {
            minimum: qctrl.minimum,
            maximum: qctrl.maximum,
            step: qctrl.step,
            default_value: qctrl.default_value,
            flags: qctrl.flags,
        })
    }

    pub fn supports(&self, flag: ControlFlag) -> bool {
        self.query(flag).is_some_and(|range| !range.is_disabled())
    }

    pub fn get(&self, flag: ControlFlag) -> DeviceResult<i32> {
        self.require(flag)?;
        let mut ctrl = V4l2Control {
            id: control_id(flag),
            value: 0,
        };
        let result = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                VIDIOC_G_CTRL,
                &mut ctrl as *mut V4l2Control,
            )
        };
        if result < 0 {
            let errno = std::io::Error::last_os_error();
            debug!(path = %self.path.display(), %flag, ?errno, "Failed to get V4L2 control");
            return Err(DeviceError::ControlFailed(format!("get {}: {}", flag, errno)));
        }
        Ok(ctrl.value)
    }

    /// Write a value, fitted into the control's range; returns the value in effect
    pub fn set(&self, flag: ControlFlag, value: i32) -> DeviceResult<i32> {
        let range = self.require(flag)?;
        if range.is_read_only() {
            return Err(DeviceError::ControlFailed(format!("{} is read-only", flag)));
        }

        let fitted = range.fit(value);
        if fitted != value {
            debug!(%flag, requested = value, applied = fitted, "Control value clamped");
        }

        let mut ctrl = V4l2Control {
            id: control_id(flag),
            value: fitted,
        };
        let result = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                VIDIOC_S_CTRL,
                &mut ctrl as *mut V4l2Control,
            )
        };
        if result < 0 {
            let errno = std::io::Error::last_os_error();
            warn!(path = %self.path.display(), %flag, value = fitted, ?errno, "Failed to set V4L2 control");
            return Err(DeviceError::ControlFailed(format!("set {}: {}", flag, errno)));
        }

        self.get(flag)
    }

    /// Restore the driver default
    pub fn reset(&self, flag: ControlFlag) -> DeviceResult<i32> {
        let range = self.require(flag)?;
        self.set(flag, range.default_value)
    }

    fn require(&self, flag: ControlFlag) -> DeviceResult<ControlRange> {
        match self.query(flag) {
            Some(range) if !range.is_disabled() => Ok(range),
            _ => Err(DeviceError::UnsupportedControl(flag)),
        }
    }
}

/// Check whether a video node can capture frames
///
/// uvcvideo registers a second node per camera for metadata; that one fails
/// this check.
pub fn is_capture_node(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut cap: V4l2Capability = unsafe { std::mem::zeroed() };
    let result = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            VIDIOC_QUERYCAP as _,
            &mut cap as *mut V4l2Capability,
        )
    };
    if result < 0 {
        return false;
    }
    let caps = if cap.capabilities & V4L2_CAP_DEVICE_CAPS != 0 {
        cap.device_caps
    } else {
        cap.capabilities
    };
    caps & V4L2_CAP_VIDEO_CAPTURE != 0
}

/// Video nodes created for a USB device, lowest index first
///
/// Walks `<sysfs device>/<interface>/video4linux/videoN`.
pub fn video_nodes(sysfs_device: &Path) -> Vec<PathBuf> {
    let mut nodes: Vec<(u32, PathBuf)> = Vec::new();
    let Ok(interfaces) = std::fs::read_dir(sysfs_device) else {
        return Vec::new();
    };

    for interface in interfaces.flatten() {
        let Ok(entries) = std::fs::read_dir(interface.path().join("video4linux")) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(index) = name.strip_prefix("video").and_then(|n| n.parse().ok()) {
                nodes.push((index, Path::new("/dev").join(&name)));
            }
        }
    }

    nodes.sort_by_key(|(index, _)| *index);
    nodes.dedup_by(|a, b| a.0 == b.0);
    nodes.into_iter().map(|(_, path)| path).collect()
}

/// First capture-capable video node of a USB device
pub fn capture_node(sysfs_device: &Path) -> Option<PathBuf> {
    video_nodes(sysfs_device)
        .into_iter()
        .find(|node| is_capture_node(node))
}
