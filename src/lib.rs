// SPDX-License-Identifier: MPL-2.0

//! UVC Session - serialized control of USB video class cameras
//!
//! This library drives UVC cameras from any thread while every device
//! operation runs on one dedicated thread per camera, and watches the USB bus
//! for cameras coming and going.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`session`]: Camera session facade and its actor thread
//! - [`backends`]: Camera drivers, USB enumeration and presence monitoring
//! - [`pipelines`]: Still image encoding and video recording
//! - [`media`]: Media index notifications for finished captures
//! - [`config`]: User configuration handling
//! - [`storage`]: Derived capture file paths
//!
//! # Example
//!
//! ```ignore
//! let monitor = DevicePresenceMonitor::new(Arc::new(SysfsUsbPlatform::new()), config.monitor_config());
//! let device = monitor.device_list()?.into_iter().next().ok_or("no camera")?;
//! let block = monitor.open_device(&device)?;
//!
//! let view = Arc::new(LatestFrameView::new());
//! let session = SessionBuilder::new(Arc::new(V4l2Driver)).view(&view).spawn()?;
//! session.open(block)?;
//! session.start_preview(DisplaySurface(view.clone()))?;
//! session.capture_still()?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod media;
pub mod pipelines;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use backends::camera::{CameraDriver, ControlFlag, UvcCamera};
pub use backends::usb::{DevicePresenceMonitor, PresenceListener, UsbControlBlock, UsbDevice};
pub use config::{Config, MonitorConfig, SessionConfig};
pub use constants::BitratePreset;
pub use errors::{DeviceError, PresenceError, RecordingError, SessionError};
pub use session::{CameraCallback, CameraEvent, SessionBuilder, SessionHandle, SessionState};
