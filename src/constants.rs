// SPDX-License-Identifier: GPL-3.0-only

//! Crate-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Video encoder bitrate presets
///
/// Used by muxer backends that expose a target bitrate. The value scales with
/// the number of pixels in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitratePreset {
    /// Smaller files, reduced quality
    Low,
    /// Balanced quality and file size (default)
    #[default]
    Medium,
    /// Larger files, better quality
    High,
}

impl BitratePreset {
    /// All presets, lowest first
    pub const ALL: [BitratePreset; 3] = [
        BitratePreset::Low,
        BitratePreset::Medium,
        BitratePreset::High,
    ];

    /// Get display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            BitratePreset::Low => "Low",
            BitratePreset::Medium => "Medium",
            BitratePreset::High => "High",
        }
    }

    /// Bitrate in kbps for a frame of the given size
    ///
    /// Medium targets roughly 6.5 bits per 1000 pixels at 30 fps, which puts
    /// 640x480 at 2 Mbps. Low halves and High doubles that figure.
    pub fn bitrate_kbps(&self, width: u32, height: u32) -> u32 {
        let pixels = u64::from(width) * u64::from(height);
        let medium = (pixels * 2_000 / (640 * 480)).clamp(500, 40_000);
        let kbps = match self {
            BitratePreset::Low => medium / 2,
            BitratePreset::Medium => medium,
            BitratePreset::High => medium * 2,
        };
        kbps as u32
    }
}

/// UVC related identifiers
pub mod uvc {
    /// USB device class for miscellaneous devices (interface association)
    pub const CLASS_MISC: u8 = 0xEF;

    /// Subclass "common class" under [`CLASS_MISC`]
    pub const SUBCLASS_COMMON: u8 = 0x02;

    /// USB interface class for video
    pub const CLASS_VIDEO: u8 = 0x0E;

    /// Video interface subclass "video control"
    pub const SUBCLASS_VIDEO_CONTROL: u8 = 0x01;
}

/// Preview defaults
pub mod preview {
    /// Default preview width
    pub const DEFAULT_WIDTH: u32 = 640;

    /// Default preview height
    pub const DEFAULT_HEIGHT: u32 = 480;

    /// Lowest frame rate the device may drop to
    pub const DEFAULT_FPS_MIN: u32 = 1;

    /// Highest frame rate requested from the device
    pub const DEFAULT_FPS_MAX: u32 = 30;

    /// Fraction of the USB bus bandwidth the stream may claim
    pub const DEFAULT_BANDWIDTH: f32 = 1.0;
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Interval between presence scans
    pub const SCAN_INTERVAL: Duration = Duration::from_millis(500);

    /// Delay before the first presence scan after registering
    pub const SCAN_INITIAL_DELAY: Duration = Duration::from_millis(1000);

    /// Delay between recording completion and the media index update,
    /// gives the container time to finalize
    pub const MEDIA_UPDATE_DELAY: Duration = Duration::from_secs(1);

    /// Longest time `stop_preview` waits for the actor
    pub const PREVIEW_STOP_TIMEOUT: Duration = Duration::from_secs(3);

    /// Longest time a release waits for an in-flight recording to finish
    pub const RELEASE_GRACE: Duration = Duration::from_secs(5);

    /// Poll timeout of the uevent watcher, bounds how long unsubscribing takes
    pub const UEVENT_POLL_TIMEOUT_MS: i32 = 250;

    /// Longest time a muxer backend waits for end-of-stream while finalizing
    pub const EOS_TIMEOUT_SECS: u64 = 10;
}

/// Media output settings
pub mod media {
    /// Default volume of the shutter sound
    pub const SHUTTER_VOLUME: f32 = 0.2;

    /// Container extension for recordings
    pub const RECORDING_EXTENSION: &str = "mp4";

    /// Subdirectory created under the pictures/videos directory
    pub const CAPTURE_SUBDIR: &str = "uvc-session";

    /// chrono format of derived capture file names
    pub const FILE_NAME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
}

/// Linux USB paths
pub mod paths {
    /// sysfs directory listing USB devices and interfaces
    pub const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";

    /// Root of the usbfs device nodes
    pub const DEV_BUS_USB: &str = "/dev/bus/usb";
}
