// SPDX-License-Identifier: MPL-2.0

//! Camera driver abstraction
//!
//! A session actor never talks to hardware directly. It asks a
//! [`CameraDriver`] to open a [`UsbControlBlock`] and then drives the returned
//! [`UvcCamera`] handle from its own thread.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   SessionHandle     │  ← Facade, any thread
//! └──────────┬──────────┘
//!            │ commands
//!            ▼
//! ┌─────────────────────┐
//! │   Session actor     │  ← One thread per device
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │  UvcCamera Trait    │  ← Common interface
//! └──────────┬──────────┘
//!            │
//!            ▼
//!       ┌────────┐
//!       │  V4L2  │  ← Concrete implementation (feature "v4l2")
//!       └────────┘
//! ```

pub mod format_converters;
pub mod types;
pub mod v4l2_controls;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use types::*;

use std::sync::Arc;

use crate::backends::usb::{UsbControlBlock, UsbDevice};
use crate::errors::DeviceResult;

/// Opens camera handles from USB control blocks
pub trait CameraDriver: Send + Sync {
    /// Acquire the camera behind an opened USB device
    ///
    /// # Arguments
    /// * `block` - Control block obtained from the presence monitor
    ///
    /// # Returns
    /// * `Ok(camera)` - Device opened, not yet streaming
    /// * `Err(DeviceError)` - Device could not be acquired
    fn open(&self, block: &UsbControlBlock) -> DeviceResult<Arc<dyn UvcCamera>>;
}

/// An opened UVC camera
///
/// All methods take `&self`; implementations guard their own internal state.
/// The session actor is the only caller of the streaming methods, value
/// accessors may additionally be called from facade callers.
pub trait UvcCamera: Send + Sync {
    // ===== Identity =====

    /// The USB device this camera was opened from
    fn device(&self) -> &UsbDevice;

    /// Capability report of the device
    fn supported_formats(&self) -> DeviceResult<Vec<FormatDescriptor>>;

    // ===== Streaming =====

    /// Negotiate size, frame rate and stream mode
    ///
    /// # Returns
    /// * `Err(DeviceError::ConfigurationRejected)` - The device refused the
    ///   combination; the caller may retry with another mode
    fn configure(&self, geometry: &PreviewGeometry) -> DeviceResult<()>;

    /// Route preview frames to a surface
    fn bind_surface(&self, binding: SurfaceBinding) -> DeviceResult<()>;

    /// Start streaming into the bound surface
    fn start_stream(&self) -> DeviceResult<()>;

    /// Stop streaming; returns once no more frames are written to the surface
    fn stop_stream(&self);

    /// Additionally route frames into an encoder input surface
    fn start_capture(&self, input: Arc<dyn FrameSink>) -> DeviceResult<()>;

    /// Detach the encoder input surface
    fn stop_capture(&self);

    /// Install or remove the raw frame callback
    ///
    /// # Arguments
    /// * `callback` - Called on the stream thread for every frame, `None` removes it
    /// * `format` - Pixel format the callback wants to receive
    fn set_frame_callback(&self, callback: Option<FrameCallback>, format: PixelFormat);

    // ===== Controls =====

    /// Check whether the device implements a control
    fn supports(&self, flag: ControlFlag) -> bool;

    /// Read the current value of a control
    fn get_property(&self, flag: ControlFlag) -> DeviceResult<i32>;

    /// Write a control value, returns the value now in effect
    fn set_property(&self, flag: ControlFlag, value: i32) -> DeviceResult<i32>;

    /// Restore the control's default, returns the value now in effect
    fn reset_property(&self, flag: ControlFlag) -> DeviceResult<i32>;

    // ===== Lifecycle =====

    /// Stop everything and release the device
    fn close(&self);
}
