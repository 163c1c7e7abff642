// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera drivers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::constants::preview;
use crate::errors::SessionError;

/// Pixel format of frame data handed around by drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// RGBA - 32-bit with alpha (4 bytes per pixel)
    RGBA,
    /// RGB24 - 24-bit RGB (3 bytes per pixel, no alpha)
    RGB24,
    /// YUYV - Packed 4:2:2 (Y0 U Y1 V interleaved)
    YUYV,
    /// NV12 - Semi-planar 4:2:0 (Y plane + interleaved UV plane)
    NV12,
    /// NV21 - Semi-planar 4:2:0 (Y plane + interleaved VU plane)
    NV21,
    /// Compressed JPEG frame as delivered by MJPEG streams
    MJPEG,
}

impl PixelFormat {
    /// Size in bytes of a tightly packed frame, `None` for compressed formats
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            Self::RGBA => Some(pixels * 4),
            Self::RGB24 => Some(pixels * 3),
            Self::YUYV => Some(pixels * 2),
            Self::NV12 | Self::NV21 => Some(pixels + pixels / 2),
            Self::MJPEG => None,
        }
    }

    /// V4L2 FourCC code
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::RGBA => *b"AB24",
            Self::RGB24 => *b"RGB3",
            Self::YUYV => *b"YUYV",
            Self::NV12 => *b"NV12",
            Self::NV21 => *b"NV21",
            Self::MJPEG => *b"MJPG",
        }
    }
}

/// Stream mode requested from the device when configuring preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PreviewMode {
    /// Uncompressed YUYV, accepted by every UVC device
    #[default]
    Yuyv,
    /// Motion JPEG, needed for high resolutions on USB 2.0
    Mjpeg,
}

impl PreviewMode {
    /// Pixel format the device delivers in this mode
    pub fn pixel_format(&self) -> PixelFormat {
        match self {
            PreviewMode::Yuyv => PixelFormat::YUYV,
            PreviewMode::Mjpeg => PixelFormat::MJPEG,
        }
    }
}

impl fmt::Display for PreviewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreviewMode::Yuyv => write!(f, "YUYV"),
            PreviewMode::Mjpeg => write!(f, "MJPEG"),
        }
    }
}

/// Preview configuration passed to the driver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviewGeometry {
    pub width: u32,
    pub height: u32,
    pub fps_min: u32,
    pub fps_max: u32,
    /// Mode tried first; the default mode is the fallback
    pub mode: PreviewMode,
    /// Fraction of the bus bandwidth, 0.0 < factor <= 1.0
    pub bandwidth_factor: f32,
}

impl Default for PreviewGeometry {
    fn default() -> Self {
        Self {
            width: preview::DEFAULT_WIDTH,
            height: preview::DEFAULT_HEIGHT,
            fps_min: preview::DEFAULT_FPS_MIN,
            fps_max: preview::DEFAULT_FPS_MAX,
            mode: PreviewMode::Mjpeg,
            bandwidth_factor: preview::DEFAULT_BANDWIDTH,
        }
    }
}

impl PreviewGeometry {
    /// Same geometry with a different stream mode
    pub fn with_mode(&self, mode: PreviewMode) -> Self {
        Self { mode, ..*self }
    }
}

/// A single frame from a camera
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
    pub format: PixelFormat,
    /// Bytes per row, may include padding
    pub stride: u32,
    /// Monotonic frame counter within one stream
    pub sequence: u64,
    pub captured_at: Instant,
}

impl CameraFrame {
    /// Build a tightly packed RGBA frame
    pub fn rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data: Arc::from(data.into_boxed_slice()),
            format: PixelFormat::RGBA,
            stride: width * 4,
            sequence: 0,
            captured_at: Instant::now(),
        }
    }
}

/// Receiver of rendered frames (a window, a texture, an encoder input)
pub trait FrameSink: Send + Sync {
    fn present(&self, frame: &CameraFrame);
}

/// Callback receiving raw frames on the driver's stream thread
pub type FrameCallback = Arc<dyn Fn(&CameraFrame) + Send + Sync>;

/// Output target bound to the stream, as seen by the driver
#[derive(Clone)]
pub enum SurfaceBinding {
    /// On-screen surface
    Display(Arc<dyn FrameSink>),
    /// Offscreen texture
    Texture(Arc<dyn FrameSink>),
}

impl SurfaceBinding {
    /// The sink behind this binding
    pub fn sink(&self) -> &Arc<dyn FrameSink> {
        match self {
            SurfaceBinding::Display(sink) | SurfaceBinding::Texture(sink) => sink,
        }
    }
}

impl fmt::Debug for SurfaceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceBinding::Display(_) => f.write_str("SurfaceBinding::Display"),
            SurfaceBinding::Texture(_) => f.write_str("SurfaceBinding::Texture"),
        }
    }
}

/// One frame size with the frame rates offered for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
    pub framerates: Vec<u32>,
}

/// Capability report for one stream mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub mode: PreviewMode,
    pub sizes: Vec<FrameSize>,
}

/// Camera control addressed by get/set/reset value calls
///
/// Raw values follow the UVC bitmask layout: processing unit controls carry
/// bit 31, camera terminal controls do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlFlag {
    Brightness,
    Contrast,
    Hue,
    Saturation,
    Sharpness,
    Gamma,
    WhiteBalanceTemperature,
    BacklightCompensation,
    Gain,
    ExposureAbsolute,
    FocusAbsolute,
    ZoomAbsolute,
}

impl ControlFlag {
    pub const ALL: [ControlFlag; 12] = [
        ControlFlag::Brightness,
        ControlFlag::Contrast,
        ControlFlag::Hue,
        ControlFlag::Saturation,
        ControlFlag::Sharpness,
        ControlFlag::Gamma,
        ControlFlag::WhiteBalanceTemperature,
        ControlFlag::BacklightCompensation,
        ControlFlag::Gain,
        ControlFlag::ExposureAbsolute,
        ControlFlag::FocusAbsolute,
        ControlFlag::ZoomAbsolute,
    ];

    /// UVC bitmask value
    pub fn bits(&self) -> u64 {
        match self {
            ControlFlag::Brightness => 0x8000_0001,
            ControlFlag::Contrast => 0x8000_0002,
            ControlFlag::Hue => 0x8000_0004,
            ControlFlag::Saturation => 0x8000_0008,
            ControlFlag::Sharpness => 0x8000_0010,
            ControlFlag::Gamma => 0x8000_0020,
            ControlFlag::WhiteBalanceTemperature => 0x8000_0040,
            ControlFlag::BacklightCompensation => 0x8000_0100,
            ControlFlag::Gain => 0x8000_0200,
            ControlFlag::ExposureAbsolute => 0x0000_0008,
            ControlFlag::FocusAbsolute => 0x0000_0020,
            ControlFlag::ZoomAbsolute => 0x0000_0200,
        }
    }

    /// Short lowercase name, accepted by [`ControlFlag::from_name`]
    pub fn name(&self) -> &'static str {
        match self {
            ControlFlag::Brightness => "brightness",
            ControlFlag::Contrast => "contrast",
            ControlFlag::Hue => "hue",
            ControlFlag::Saturation => "saturation",
            ControlFlag::Sharpness => "sharpness",
            ControlFlag::Gamma => "gamma",
            ControlFlag::WhiteBalanceTemperature => "white-balance",
            ControlFlag::BacklightCompensation => "backlight",
            ControlFlag::Gain => "gain",
            ControlFlag::ExposureAbsolute => "exposure",
            ControlFlag::FocusAbsolute => "focus",
            ControlFlag::ZoomAbsolute => "zoom",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|flag| flag.name().eq_ignore_ascii_case(name))
    }
}

impl TryFrom<u64> for ControlFlag {
    type Error = SessionError;

    fn try_from(bits: u64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|flag| flag.bits() == bits)
            .ok_or_else(|| SessionError::InvalidArgument(format!("unknown control flag {bits:#x}")))
    }
}

impl fmt::Display for ControlFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
